//! Synchronization state carried alongside the best-available data.

use crate::Error;

/// Tagged synchronization state.
///
/// Data is always present. An empty collection means nothing is cached yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource<T> {
    /// Refresh in progress; data is the last known snapshot.
    Loading(T),
    /// Data is authoritative (freshly fetched or already fresh).
    Success(T),
    /// Refresh failed; data is the last known snapshot.
    Error(T, Error),
}

impl<T> Resource<T> {
    pub fn data(&self) -> &T {
        match self {
            Resource::Loading(data) | Resource::Success(data) | Resource::Error(data, _) => data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Resource::Loading(data) | Resource::Success(data) | Resource::Error(data, _) => data,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Resource::Error(_, err) => Some(err),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Resource::Loading(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Resource::Success(_))
    }

    /// Success and Error end a synchronization; Loading does not.
    pub fn is_terminal(&self) -> bool {
        !self.is_loading()
    }

    /// Short status label, used in logs.
    pub fn status(&self) -> &'static str {
        match self {
            Resource::Loading(_) => "loading",
            Resource::Success(_) => "success",
            Resource::Error(..) => "error",
        }
    }

    pub fn map<U, F>(self, f: F) -> Resource<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Resource::Loading(data) => Resource::Loading(f(data)),
            Resource::Success(data) => Resource::Success(f(data)),
            Resource::Error(data, err) => Resource::Error(f(data), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_survives_error() {
        let res = Resource::Error(vec![1, 2], Error::Transport("timeout".into()));
        assert_eq!(res.data(), &vec![1, 2]);
        assert!(res.is_terminal());
        assert_eq!(res.error(), Some(&Error::Transport("timeout".into())));
    }

    #[test]
    fn test_map_keeps_tag() {
        let res = Resource::Loading(vec![1, 2, 3]).map(|v| v.len());
        assert_eq!(res, Resource::Loading(3));
        assert_eq!(res.status(), "loading");
        assert!(!res.is_terminal());
    }
}
