//! Speed, reduction, and target value types shared across the engine.
//!
//! All finite magnitudes are expressed in the configured [`Units`]; only the
//! client adapters convert to backend-native units. The stream sentinel is a
//! real enum variant here instead of a float infinity so it cannot leak past
//! the resolver by accident.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A per-direction speed: a finite value in config units, or unlimited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Speed {
    Limited(f64),
    Unlimited,
}

impl Speed {
    pub fn is_unlimited(&self) -> bool {
        matches!(self, Speed::Unlimited)
    }

    /// Human-readable form for logs, e.g. `800 mbit/s` or `unlimited`.
    pub fn describe(&self, units: Units) -> String {
        match self {
            Speed::Limited(v) => format!("{}{}", v, units),
            Speed::Unlimited => "unlimited".to_string(),
        }
    }
}

/// An upload reduction reported by a module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UploadReduction {
    /// Finite amount to subtract from the configured max (0 = no effect).
    Amount(f64),
    /// Demand unlimited upload, overriding all reductions.
    Unlimited,
    /// Defer to stream-based resolution. Carries no magnitude; the resolver
    /// must consume this before allocation.
    Stream,
}

/// A download reduction reported by a module. Download has no stream
/// sentinel: inbound transfer is throttled purely by policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DownloadReduction {
    Amount(f64),
    Unlimited,
}

/// Per-module reduction pair, queried fresh every cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionValue {
    pub upload: UploadReduction,
    pub download: DownloadReduction,
}

impl ReductionValue {
    /// A reduction with no effect in either direction.
    pub fn none() -> Self {
        Self {
            upload: UploadReduction::Amount(0.0),
            download: DownloadReduction::Amount(0.0),
        }
    }
}

/// A reduction magnitude as written in the config: a number or `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReductionAmount {
    Amount(f64),
    Unlimited,
}

impl From<ReductionAmount> for UploadReduction {
    fn from(a: ReductionAmount) -> Self {
        match a {
            ReductionAmount::Amount(v) => UploadReduction::Amount(v),
            ReductionAmount::Unlimited => UploadReduction::Unlimited,
        }
    }
}

impl From<ReductionAmount> for DownloadReduction {
    fn from(a: ReductionAmount) -> Self {
        match a {
            ReductionAmount::Amount(v) => DownloadReduction::Amount(v),
            ReductionAmount::Unlimited => DownloadReduction::Unlimited,
        }
    }
}

impl<'de> Deserialize<'de> for ReductionAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = ReductionAmount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative number or \"unlimited\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if v < 0.0 || !v.is_finite() {
                    return Err(E::custom("reduction must be finite and non-negative"));
                }
                Ok(ReductionAmount::Amount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v.eq_ignore_ascii_case("unlimited") {
                    Ok(ReductionAmount::Unlimited)
                } else {
                    Err(E::custom(format!("unknown reduction value: {:?}", v)))
                }
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// A media-server absolute upload target: an absolute value in config units,
/// a percentage of the configured max, or unlimited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSpeed {
    Amount(f64),
    Percent(f64),
    Unlimited,
}

impl FromStr for TargetSpeed {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(TargetSpeed::Unlimited);
        }
        if let Some(pct) = s.strip_suffix('%') {
            let pct: f64 = pct
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid percentage: {:?}", s))?;
            if pct < 0.0 || !pct.is_finite() {
                anyhow::bail!("percentage must be finite and non-negative: {:?}", s);
            }
            return Ok(TargetSpeed::Percent(pct));
        }
        let v: f64 = s
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid target speed: {:?}", s))?;
        if v < 0.0 || !v.is_finite() {
            anyhow::bail!("target speed must be finite and non-negative: {:?}", s);
        }
        Ok(TargetSpeed::Amount(v))
    }
}

impl<'de> Deserialize<'de> for TargetSpeed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TargetVisitor;

        impl<'de> Visitor<'de> for TargetVisitor {
            type Value = TargetSpeed;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number, \"<pct>%\", or \"unlimited\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                if v < 0.0 || !v.is_finite() {
                    return Err(E::custom("target speed must be finite and non-negative"));
                }
                Ok(TargetSpeed::Amount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                self.visit_f64(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TargetVisitor)
    }
}

/// Unit all configured speeds are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Units {
    /// Bits per second.
    #[serde(rename = "bps")]
    Bps,
    /// Kilobits per second (1000 bits).
    #[serde(rename = "kbps")]
    Kbps,
    /// Megabits per second (1000^2 bits).
    #[default]
    #[serde(rename = "mbps")]
    Mbps,
    /// Kibibytes per second (1024 bytes).
    #[serde(rename = "kb")]
    Kib,
    /// Mebibytes per second (1024^2 bytes).
    #[serde(rename = "mb")]
    Mib,
}

impl Units {
    /// Convert a value in this unit to whole bytes per second (rounded down).
    pub fn to_bytes_per_sec(&self, value: f64) -> u64 {
        let bytes = match self {
            Units::Bps => value / 8.0,
            Units::Kbps => value * 125.0,
            Units::Mbps => value * 125_000.0,
            Units::Kib => value * 1024.0,
            Units::Mib => value * 1_048_576.0,
        };
        bytes.max(0.0) as u64
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Units::Bps => "bit/s",
            Units::Kbps => "kbit/s",
            Units::Mbps => "mbit/s",
            Units::Kib => "KiB/s",
            Units::Mib => "MiB/s",
        };
        f.write_str(label)
    }
}
