//! Request key normalization for cache regions.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use url::Url;

/// `-2x`, `-800px`, `-640w` right before the extension.
static SIZE_SUFFIX: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"-\d+(?:px|x|w)(\.[A-Za-z0-9]+)$").expect("valid regex"));

/// Identity of a request inside a region: the URL without its fragment.
pub fn request_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// Key for an image, shared by all pixel-density variants of one asset.
pub fn image_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  let path = SIZE_SUFFIX.replace(url.path(), "$1").into_owned();
  url.set_path(&path);
  url.to_string()
}

/// Fixed-length address of a key, used as the row identity.
pub fn hash_key(key: &str) -> String {
  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(key.as_bytes());
  hex::encode(hasher.finalize())
}
