//! Catalog item model.
//!
//! Items are decoded from, and served back to clients in, the same JSON shape:
//!
//! ```json
//! { "cid": "...", "url": "...", "source": "...",
//!   "images": [ { "src": "...", "thumb": "...", "size": { "width": 1, "height": 1 } } ] }
//! ```
//!
//! Missing fields take their zero value and unknown fields are ignored, so that files written by
//! older or newer scrapers still load.
use std::{fs::File, io::BufReader, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    /// Catalog id, also the directory name of the item's images
    pub cid: String,
    /// Where the item was originally found
    pub url: String,
    /// Provenance tag
    pub source: String,
    pub images: Vec<ImageVariant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageVariant {
    #[serde(rename = "src")]
    pub source: String,
    pub thumb: String,
    pub size: ImageSize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSize {
    pub width: i64,
    pub height: i64,
}

impl Item {
    /// Decode a single item from a file on disk
    ///
    /// Only the first JSON value in the file is read; anything after it is ignored.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| Error::ReadItem {
            path: path.to_path_buf(),
            source,
        })?;
        let decode_err = |source| Error::DecodeItem {
            path: path.to_path_buf(),
            source,
        };
        match serde_json::Deserializer::from_reader(BufReader::new(file))
            .into_iter::<Self>()
            .next()
        {
            Some(item) => item.map_err(decode_err),
            None => Err(decode_err(<serde_json::Error as serde::de::Error>::custom(
                "file holds no JSON value",
            ))),
        }
    }
}
