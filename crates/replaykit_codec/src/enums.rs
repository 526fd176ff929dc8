//! Enumerations stored by variant name.

/// A fieldless enum that can be logged.
///
/// Tables store enums by [`name`](LogEnum::name). Record codecs store them
/// by [`ordinal`](LogEnum::ordinal), which is the position in
/// [`variants`](LogEnum::variants); reordering variants therefore changes
/// the meaning of previously packed structs.
///
/// Use [`log_enum!`](crate::log_enum) to implement this for a plain enum.
pub trait LogEnum: Sized + Copy + PartialEq + Send + Sync + 'static {
    /// All variants in declaration order.
    fn variants() -> &'static [Self];

    /// The variant name.
    fn name(self) -> &'static str;

    /// The declaration index of this variant.
    fn ordinal(self) -> usize {
        Self::variants()
            .iter()
            .position(|v| *v == self)
            .unwrap_or_default()
    }

    /// Looks up a variant by declaration index.
    fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::variants().get(ordinal).copied()
    }

    /// Looks up a variant by name.
    fn from_name(name: &str) -> Option<Self> {
        Self::variants().iter().copied().find(|v| v.name() == name)
    }
}

/// Implements [`LogEnum`] for a fieldless enum.
///
/// ```rust
/// use replaykit_codec::{log_enum, LogEnum};
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Mode { Idle, Intake, Score }
/// log_enum!(Mode { Idle, Intake, Score });
///
/// assert_eq!(Mode::Score.name(), "Score");
/// assert_eq!(Mode::from_name("Intake"), Some(Mode::Intake));
/// assert_eq!(Mode::Score.ordinal(), 2);
/// ```
#[macro_export]
macro_rules! log_enum {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $crate::LogEnum for $ty {
            fn variants() -> &'static [Self] {
                &[$($ty::$variant),+]
            }

            fn name(self) -> &'static str {
                match self {
                    $($ty::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Gear {
        Low,
        High,
    }
    crate::log_enum!(Gear { Low, High });

    #[test]
    fn names_and_ordinals() {
        assert_eq!(Gear::Low.name(), "Low");
        assert_eq!(Gear::High.ordinal(), 1);
        assert_eq!(Gear::from_ordinal(0), Some(Gear::Low));
        assert_eq!(Gear::from_ordinal(2), None);
        assert_eq!(Gear::from_name("High"), Some(Gear::High));
        assert_eq!(Gear::from_name("Reverse"), None);
    }
}
