// ── State values ──
//
// Every registered state can be `Unknown`: before the device has reported
// anything, and whenever connectivity to the device is lost.

use serde_json::Value as Json;

/// A state value that may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StateValue<T> {
    /// No trustworthy value is available.
    #[default]
    Unknown,
    /// A value reported by its source.
    Known(T),
}

impl<T> StateValue<T> {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Borrow the known value, if any.
    pub fn as_known(&self) -> Option<&T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }

    pub fn into_known(self) -> Option<T> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StateValue<U> {
        match self {
            Self::Known(value) => StateValue::Known(f(value)),
            Self::Unknown => StateValue::Unknown,
        }
    }
}

impl<T> From<Option<T>> for StateValue<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Unknown, Self::Known)
    }
}

impl<T: Into<Json>> StateValue<T> {
    /// Convert into the JSON form exchanged with the registry.
    pub fn into_json(self) -> StateValue<Json> {
        self.map(Into::into)
    }
}
