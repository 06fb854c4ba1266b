//! Reset and change flag sets.
//!
//! [`RequiredResetKind`] says which part of a slot's assignment must be
//! recomputed; [`ReasonSlotChange`] says what triggered the recomputation.
//! The two are distinct types so their bits can never be mixed up.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::domain::errors::DomainError;

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        $name:ident { $( $(#[$fmeta:meta])* $flag:ident = $bit:expr => $label:literal ),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u8);

        impl $name {
            /// Empty set
            pub const NONE: Self = Self(0);
            $( $(#[$fmeta])* pub const $flag: Self = Self($bit); )+

            const NAMED: &'static [(Self, &'static str)] = &[ $( (Self($bit), $label) ),+ ];

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// `other ⊆ self`
            pub const fn has_flag(self, other: Self) -> bool {
                other.0 == (self.0 & other.0)
            }

            /// `self ∩ other ≠ ∅`
            pub const fn intersects(self, other: Self) -> bool {
                (self.0 & other.0) != 0
            }

            #[must_use]
            pub const fn add(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[must_use]
            pub const fn remove(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            /// Names of the single flags that are set.
            pub fn names(self) -> Vec<&'static str> {
                Self::NAMED
                    .iter()
                    .filter(|(flag, _)| self.has_flag(*flag))
                    .map(|(_, label)| *label)
                    .collect()
            }

            pub fn from_name(name: &str) -> Result<Self, DomainError> {
                Self::NAMED
                    .iter()
                    .find(|(_, label)| label.eq_ignore_ascii_case(name.trim()))
                    .map(|(flag, _)| *flag)
                    .ok_or_else(|| DomainError::UnknownFlag(name.to_string()))
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                self.add(rhs)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                *self = self.add(rhs);
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_empty() {
                    f.write_str("none")
                } else {
                    f.write_str(&self.names().join("|"))
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if s.is_empty() || s.eq_ignore_ascii_case("none") {
                    return Ok(Self::NONE);
                }
                s.split(|c| c == '|' || c == ',')
                    .map(Self::from_name)
                    .try_fold(Self::NONE, |acc, flag| -> Result<Self, DomainError> {
                        Ok(acc | flag?)
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.names().serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Repr {
                    List(Vec<String>),
                    Joined(String),
                }

                match Repr::deserialize(deserializer)? {
                    Repr::List(names) => names
                        .iter()
                        .map(|name| Self::from_name(name))
                        .try_fold(Self::NONE, |acc, flag| -> Result<Self, DomainError> {
                            Ok(acc | flag?)
                        })
                        .map_err(serde::de::Error::custom),
                    Repr::Joined(joined) => joined.parse().map_err(serde::de::Error::custom),
                }
            }
        }
    };
}

flag_set! {
    /// Portion of a slot's reason assignment that must be recomputed.
    RequiredResetKind {
        /// Recount the auto reasons
        EXTRA_AUTO = 0b001 => "extra_auto",
        /// Recompute the extra manual flag
        EXTRA_MANUAL = 0b010 => "extra_manual",
        /// Recompute the main reason
        MAIN = 0b100 => "main",
    }
}

impl RequiredResetKind {
    /// Main and both extra layers
    pub const FULL: Self = Self(0b111);

    pub const fn is_full(self) -> bool {
        self.has_flag(Self::FULL)
    }
}

flag_set! {
    /// What triggered a recomputation of a slot.
    ReasonSlotChange {
        /// A new activity period was detected
        NEW_ACTIVITY = 0b000_0001 => "new_activity",
        /// The slot boundaries moved
        PERIOD = 0b000_0010 => "period",
        MACHINE_MODE = 0b000_0100 => "machine_mode",
        MACHINE_OBSERVATION_STATE = 0b000_1000 => "machine_observation_state",
        /// A manual reason was reset or entered
        RESET_MANUAL = 0b001_0000 => "reset_manual",
        /// Explicit re-evaluation
        REQUESTED = 0b010_0000 => "requested",
        /// The reason itself changed
        REASON = 0b100_0000 => "reason",
    }
}

impl ReasonSlotChange {
    /// Triggers that override manual stickiness.
    pub const FORCING: Self = Self(0b011_0000);

    /// Reset kind implied by the trigger alone, whatever the providers say.
    pub const fn forced_reset(self) -> RequiredResetKind {
        if self.has_flag(Self::REQUESTED) {
            RequiredResetKind::FULL
        } else if self.has_flag(Self::RESET_MANUAL) {
            RequiredResetKind::MAIN
        } else {
            RequiredResetKind::NONE
        }
    }

    pub const fn is_forcing(self) -> bool {
        self.intersects(Self::FORCING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_contains_every_kind() {
        let full = RequiredResetKind::FULL;
        assert!(full.has_flag(RequiredResetKind::MAIN));
        assert!(full.has_flag(RequiredResetKind::EXTRA_AUTO | RequiredResetKind::EXTRA_MANUAL));
        assert_eq!(
            RequiredResetKind::EXTRA_AUTO | RequiredResetKind::EXTRA_MANUAL | RequiredResetKind::MAIN,
            full
        );
    }

    #[test]
    fn test_remove_and_empty() {
        let kind = RequiredResetKind::FULL.remove(RequiredResetKind::MAIN);
        assert!(!kind.has_flag(RequiredResetKind::MAIN));
        assert!(!kind.is_full());
        assert!(kind.remove(kind).is_empty());
    }

    #[test]
    fn test_forced_reset() {
        assert_eq!(
            ReasonSlotChange::REQUESTED.forced_reset(),
            RequiredResetKind::FULL
        );
        assert_eq!(
            (ReasonSlotChange::RESET_MANUAL | ReasonSlotChange::PERIOD).forced_reset(),
            RequiredResetKind::MAIN
        );
        assert!(ReasonSlotChange::PERIOD.forced_reset().is_empty());
    }

    #[test]
    fn test_parse_and_display() {
        let change: ReasonSlotChange = "period|machine_mode".parse().unwrap();
        assert!(change.has_flag(ReasonSlotChange::PERIOD));
        assert!(change.has_flag(ReasonSlotChange::MACHINE_MODE));
        assert_eq!(change.to_string(), "period|machine_mode");
        assert_eq!(ReasonSlotChange::NONE.to_string(), "none");
        assert!("bogus".parse::<ReasonSlotChange>().is_err());
    }

    #[test]
    fn test_serde_list_and_joined() {
        let from_list: RequiredResetKind = serde_json::from_str(r#"["main","extra_auto"]"#).unwrap();
        let from_joined: RequiredResetKind = serde_json::from_str(r#""main|extra_auto""#).unwrap();
        assert_eq!(from_list, from_joined);
        assert_eq!(
            serde_json::to_string(&from_list).unwrap(),
            r#"["extra_auto","main"]"#
        );
    }
}
