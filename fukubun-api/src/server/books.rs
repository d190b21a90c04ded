use async_trait::async_trait;
use fukubun_common::model::shelf::{BookMetadata, Isbn};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Book lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Source of bibliographic data for ISBNs.
#[async_trait]
pub trait BookLookup: Send + Sync {
    /// `Ok(None)` when the service knows no book with this ISBN.
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookMetadata>, LookupError>;
}

#[derive(Clone, Debug)]
pub struct GoogleBooks {
    client: reqwest::Client,
    base_url: String,
}

impl GoogleBooks {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Volume>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    #[serde(default)]
    volume_info: VolumeInfo,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    image_links: Option<ImageLinks>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Deserialize)]
struct ImageLinks {
    #[serde(default)]
    thumbnail: String,
}

impl From<VolumeInfo> for BookMetadata {
    fn from(value: VolumeInfo) -> Self {
        Self {
            title: value.title,
            authors: value.authors.join(", "),
            thumbnail: value
                .image_links
                .map(|links| links.thumbnail)
                .unwrap_or_default(),
        }
    }
}

impl VolumesResponse {
    /// The first match wins.
    fn into_metadata(self) -> Option<BookMetadata> {
        self.items
            .into_iter()
            .next()
            .map(|volume| volume.volume_info.into())
    }
}

#[async_trait]
impl BookLookup for GoogleBooks {
    async fn lookup(&self, isbn: &Isbn) -> Result<Option<BookMetadata>, LookupError> {
        let query = format!("isbn:{isbn}");
        let response: VolumesResponse = self
            .client
            .get(format!("{}/volumes", self.base_url))
            .query(&[("q", query.as_str()), ("country", "JP")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!(%isbn, matches = response.items.len(), "Looked up book");

        Ok(response.into_metadata())
    }
}

#[cfg(test)]
mod tests {
    use crate::server::books::VolumesResponse;
    use fukubun_common::model::shelf::BookMetadata;

    #[test]
    fn first_volume_becomes_metadata() {
        let response: VolumesResponse = serde_json::from_str(
            r#"{
                "totalItems": 2,
                "items": [
                    {
                        "volumeInfo": {
                            "title": "こころ",
                            "authors": ["夏目漱石", "Editor"],
                            "imageLinks": { "thumbnail": "http://books.example/kokoro.jpg" }
                        }
                    },
                    { "volumeInfo": { "title": "Other" } }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            response.into_metadata(),
            Some(BookMetadata {
                title: "こころ".to_owned(),
                authors: "夏目漱石, Editor".to_owned(),
                thumbnail: "http://books.example/kokoro.jpg".to_owned(),
            })
        );
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let response: VolumesResponse =
            serde_json::from_str(r#"{ "items": [{ "volumeInfo": {} }] }"#).unwrap();
        assert_eq!(response.into_metadata(), Some(BookMetadata::default()));

        let empty: VolumesResponse = serde_json::from_str(r#"{ "totalItems": 0 }"#).unwrap();
        assert_eq!(empty.into_metadata(), None);
    }
}
