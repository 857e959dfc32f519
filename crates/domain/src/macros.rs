//! Macro for implementing Display and FromStr for label enums
//!
//! Classification enums travel to operator tooling as fixed labels
//! (`TIMEOUT`, `HIGH`, `COMMUNICATION`). This macro keeps the label table in
//! one place and parses it back case-insensitively.
//!
//! # Example
//!
//! ```rust
//! use relaygate_domain::impl_domain_label_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Channel {
//!     Inbound,
//!     Outbound,
//! }
//!
//! impl_domain_label_conversions!(Channel {
//!     Inbound => "INBOUND",
//!     Outbound => "OUTBOUND",
//! });
//!
//! assert_eq!(Channel::Inbound.to_string(), "INBOUND");
//! assert_eq!("outbound".parse::<Channel>().unwrap(), Channel::Outbound);
//! ```

/// Implements `Display`, `FromStr` and an `as_str` accessor for label enums.
///
/// * `Display` writes the label verbatim
/// * `FromStr` accepts the label in any ASCII case
/// * the parse error names the enum and echoes the rejected input
#[macro_export]
macro_rules! impl_domain_label_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Stable label for this variant.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                $(
                    if trimmed.eq_ignore_ascii_case($str) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", stringify!($enum_name), s))
            }
        }
    };
}
