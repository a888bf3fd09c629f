//! Sampler and scheduler choices accepted by the text-to-image graph.
//!
//! The names are passed through to the backend's `KSampler` node
//! verbatim. Both enums serialize as their backend name and parse from
//! it, so unknown choices are rejected before a request is accepted.

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Declares a closed set of backend names as a Rust enum with string
/// conversions in both directions.
macro_rules! named_choices {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $( $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
        }

        impl $name {
            /// Every accepted value, in the order the backend lists them.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )+ ];

            /// Name understood by the backend.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|choice| choice.as_str() == s)
                    .ok_or_else(|| {
                        let valid: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                        CoreError::Validation(format!(
                            "Unknown {}: '{s}'. Valid values: {}",
                            $kind,
                            valid.join(", ")
                        ))
                    })
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

named_choices! {
    /// Sampling algorithm used by the denoising loop.
    Sampler, "sampler" {
        Euler => "euler",
        EulerAncestral => "euler_ancestral",
        Heun => "heun",
        HeunPp2 => "heunpp2",
        Dpm2 => "dpm_2",
        Dpm2Ancestral => "dpm_2_ancestral",
        Lms => "lms",
        DpmFast => "dpm_fast",
        DpmAdaptive => "dpm_adaptive",
        DpmPp2sAncestral => "dpmpp_2s_ancestral",
        DpmPpSde => "dpmpp_sde",
        DpmPpSdeGpu => "dpmpp_sde_gpu",
        DpmPp2m => "dpmpp_2m",
        DpmPp2mSde => "dpmpp_2m_sde",
        DpmPp2mSdeGpu => "dpmpp_2m_sde_gpu",
        DpmPp3mSde => "dpmpp_3m_sde",
        DpmPp3mSdeGpu => "dpmpp_3m_sde_gpu",
        Ddpm => "ddpm",
        Lcm => "lcm",
        Ddim => "ddim",
        UniPc => "uni_pc",
        UniPcBh2 => "uni_pc_bh2",
    }
}

named_choices! {
    /// Noise schedule used by the sampler.
    Scheduler, "scheduler" {
        Normal => "normal",
        Karras => "karras",
        Exponential => "exponential",
        SgmUniform => "sgm_uniform",
        Simple => "simple",
        DdimUniform => "ddim_uniform",
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler::Euler
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::Normal
    }
}
