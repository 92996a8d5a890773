//! This module provides helpers to deal with the namespace the controller watches.
use std::convert::Infallible;

use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource};

/// Either every namespace or a single one. An empty string on the CLI means all.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum WatchNamespace {
    All,
    One(String),
}

impl From<&str> for WatchNamespace {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            Self::All
        } else {
            Self::One(s.to_string())
        }
    }
}

impl std::str::FromStr for WatchNamespace {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl WatchNamespace {
    /// Gets an API object for the namespace in question or for all namespaces,
    /// depending on which variant we are.
    pub fn get_api<T>(&self, client: &Client) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match self {
            Self::All => Api::all(client.clone()),
            Self::One(namespace) => Api::namespaced(client.clone(), namespace),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("", WatchNamespace::All)]
    #[case("default", WatchNamespace::One("default".to_owned()))]
    fn parse_watch_namespace(#[case] input: &str, #[case] expected: WatchNamespace) {
        assert_eq!(input.parse::<WatchNamespace>(), Ok(expected));
    }
}
