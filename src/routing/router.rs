//! Handler lookup by path.
//!
//! # Responsibilities
//! - Store handler registrations in configuration order
//! - Look up the handler for a request or connection path
//! - Return an explicit no-match
//!
//! # Design Decisions
//! - Immutable after boot; inherited by every forked process
//! - Registration index doubles as a stable handler id for connection bindings
//! - O(n) scan; handler counts are small

use std::sync::Arc;

use crate::app::Handler;
use crate::config::Options;
use crate::routing::matcher::PathMatcher;

/// A handler bound to a normalized path.
pub struct Registration {
    pub matcher: PathMatcher,
    pub options: Options,
    pub handler: Arc<dyn Handler>,
}

impl Registration {
    pub fn path(&self) -> &str {
        self.matcher.path()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("matcher", &self.matcher)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Ordered set of handler registrations.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Registration>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` at the normalized `path`.
    ///
    /// A path that is already registered is overwritten in place, keeping
    /// its original position. Returns the registration index.
    pub fn insert(&mut self, path: &str, options: Options, handler: Arc<dyn Handler>) -> usize {
        let registration = Registration {
            matcher: PathMatcher::for_path(path),
            options,
            handler,
        };
        match self.routes.iter().position(|r| r.path() == path) {
            Some(index) => {
                tracing::debug!(path, "Overwriting handler registration");
                self.routes[index] = registration;
                index
            }
            None => {
                self.routes.push(registration);
                self.routes.len() - 1
            }
        }
    }

    /// First registration matching `path`, with its index.
    pub fn match_path(&self, path: &str) -> Option<(usize, &Registration)> {
        self.routes
            .iter()
            .enumerate()
            .find(|(_, r)| r.matcher.matches(path))
    }

    pub fn get(&self, index: usize) -> Option<&Registration> {
        self.routes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.routes.iter()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.path()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Handler;

    #[derive(Debug)]
    struct Named(&'static str);

    impl Handler for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn handler(name: &'static str) -> Arc<dyn Handler> {
        Arc::new(Named(name))
    }

    fn matched<'a>(router: &'a Router, path: &str) -> Option<&'a str> {
        router.match_path(path).map(|(_, r)| r.path())
    }

    #[test]
    fn exact_then_prefix() {
        let mut router = Router::new();
        router.insert("/a", Options::new(), handler("exact"));
        router.insert("/a/", Options::new(), handler("prefix"));

        assert_eq!(matched(&router, "/a"), Some("/a"));
        assert_eq!(matched(&router, "/a/b"), Some("/a/"));
        assert_eq!(matched(&router, "/b"), None);
    }

    #[test]
    fn first_registered_overlapping_prefix_wins() {
        let mut router = Router::new();
        router.insert("/", Options::new(), handler("root"));
        router.insert("/api/", Options::new(), handler("api"));

        let (index, registration) = router.match_path("/api/users").unwrap();
        assert_eq!(index, 0);
        assert_eq!(registration.handler.name(), "root");
    }

    #[test]
    fn duplicate_path_keeps_position_and_takes_last_instance() {
        let mut router = Router::new();
        router.insert("/x", Options::new(), handler("first"));
        router.insert("/y", Options::new(), handler("other"));
        let index = router.insert("/x", Options::new(), handler("second"));

        assert_eq!(index, 0);
        assert_eq!(router.paths(), vec!["/x", "/y"]);
        assert_eq!(router.get(0).unwrap().handler.name(), "second");
    }
}
