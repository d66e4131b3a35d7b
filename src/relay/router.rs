//! Request classification.

use std::collections::BTreeMap;
use url::{Origin, Url};

use crate::config::{Config, RoutesConfig};
use crate::net::Method;

/// What to do with one intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Navigation to an app page: serve this shell document from the shell region
  Shell { document: String },
  /// Image asset: cache-first with density-normalized keys
  Image,
  /// Map tiles and map scripts: cache-first
  MapTile,
  /// Restaurant listing: network-first, persisted fallback
  Listing,
  /// Reviews for one restaurant: network-first, persisted fallback
  ReviewsRead,
  /// New review: network, queued in the outbox when unreachable
  ReviewsWrite,
  /// Drain the outbox now
  Replay,
  /// Forwarded untouched, never cached
  NetworkOnly,
  /// Anything else: any region, else network
  Passthrough,
}

impl Route {
  /// Routes served by the API origin rather than the app origin.
  pub fn is_api(&self) -> bool {
    matches!(
      self,
      Route::Listing | Route::ReviewsRead | Route::ReviewsWrite | Route::Replay | Route::NetworkOnly
    )
  }

  pub fn name(&self) -> &'static str {
    match self {
      Route::Shell { .. } => "shell",
      Route::Image => "image",
      Route::MapTile => "map",
      Route::Listing => "listing",
      Route::ReviewsRead => "reviews-read",
      Route::ReviewsWrite => "reviews-write",
      Route::Replay => "replay",
      Route::NetworkOnly => "network-only",
      Route::Passthrough => "passthrough",
    }
  }
}

/// Maps requests to routes. Rules are checked in priority order.
#[derive(Debug, Clone)]
pub struct Router {
  app_origin: Origin,
  routes: RoutesConfig,
  pages: BTreeMap<String, String>,
}

impl Router {
  pub fn new(config: &Config) -> Self {
    Self {
      app_origin: config.upstream.app.origin(),
      routes: config.routes.clone(),
      pages: config.shell.pages.clone(),
    }
  }

  pub fn classify(&self, method: &Method, url: &Url) -> Route {
    let path = url.path();
    let same_origin = url.origin() == self.app_origin;

    if same_origin {
      if method.is_read() {
        if let Some(document) = self.pages.get(path) {
          return Route::Shell {
            document: document.clone(),
          };
        }
      }

      if under(path, &self.routes.images) {
        return Route::Image;
      }
    }

    if under(path, &self.routes.map) {
      return Route::MapTile;
    }

    if path == self.routes.listing {
      return Route::Listing;
    }

    if under(path, &self.routes.reviews) {
      return match method {
        Method::Get => Route::ReviewsRead,
        Method::Post => Route::ReviewsWrite,
        _ => Route::NetworkOnly,
      };
    }

    if *method == Method::Post && under(path, &self.routes.replay) {
      return Route::Replay;
    }

    Route::Passthrough
  }
}

/// `path` is `prefix` itself or lies below it.
fn under(path: &str, prefix: &str) -> bool {
  match path.strip_prefix(prefix) {
    Some("") => true,
    Some(rest) => prefix.ends_with('/') || rest.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn router() -> Router {
    Router::new(&Config::default())
  }

  fn classify(method: Method, url: &str) -> Route {
    router().classify(&method, &Url::parse(url).unwrap())
  }

  #[test]
  fn test_root_serves_index_shell() {
    assert_eq!(
      classify(Method::Get, "http://localhost:8000/"),
      Route::Shell {
        document: "/index.html".into()
      }
    );
  }

  #[test]
  fn test_detail_page_ignores_query() {
    assert_eq!(
      classify(Method::Get, "http://localhost:8000/restaurant.html?id=3"),
      Route::Shell {
        document: "/restaurant.html".into()
      }
    );
  }

  #[test]
  fn test_shell_only_on_app_origin() {
    assert_eq!(classify(Method::Get, "http://elsewhere:8000/"), Route::Passthrough);
    assert_eq!(
      classify(Method::Get, "http://elsewhere:8000/img/1.jpg"),
      Route::Passthrough
    );
  }

  #[test]
  fn test_images_and_map() {
    assert_eq!(classify(Method::Get, "http://localhost:8000/img/1-2x.jpg"), Route::Image);
    assert_eq!(
      classify(Method::Get, "https://maps.example.com/maps/api/js?key=k"),
      Route::MapTile
    );
    assert_eq!(
      classify(Method::Get, "http://localhost:8000/maps/api/jsx"),
      Route::Passthrough
    );
  }

  #[test]
  fn test_listing_is_exact() {
    assert_eq!(classify(Method::Get, "http://localhost:1337/restaurants"), Route::Listing);
    assert_eq!(
      classify(Method::Put, "http://localhost:1337/restaurants/3/?is_favorite=true"),
      Route::Passthrough
    );
  }

  #[test]
  fn test_reviews_by_method() {
    let url = "http://localhost:1337/reviews/?restaurant_id=6";
    assert_eq!(classify(Method::Get, url), Route::ReviewsRead);
    assert_eq!(classify(Method::Post, url), Route::ReviewsWrite);
    assert_eq!(classify(Method::Delete, url), Route::NetworkOnly);
  }

  #[test]
  fn test_replay_requires_post() {
    assert_eq!(classify(Method::Post, "http://localhost:1337/unsent"), Route::Replay);
    assert_eq!(classify(Method::Get, "http://localhost:1337/unsent"), Route::Passthrough);
  }

  #[test]
  fn test_unknown_falls_through() {
    assert_eq!(
      classify(Method::Get, "http://localhost:8000/main.bundle.js"),
      Route::Passthrough
    );
  }

  #[test]
  fn test_under() {
    assert!(under("/img/a.jpg", "/img/"));
    assert!(under("/reviews", "/reviews"));
    assert!(under("/reviews/", "/reviews"));
    assert!(!under("/reviewsx", "/reviews"));
    assert!(!under("/im", "/img/"));
  }

  #[test]
  fn test_api_routes() {
    assert!(Route::Listing.is_api());
    assert!(Route::Replay.is_api());
    assert!(!Route::Image.is_api());
    assert!(!Route::Passthrough.is_api());
  }
}
