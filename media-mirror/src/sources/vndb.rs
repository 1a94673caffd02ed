//! VNDB Kana API, used for visual novel lookups.

use super::found;
use crate::upstream::{UpstreamClient, UpstreamError};
use serde::Deserialize;
use serde_json::json;
use url::Url;

const UPSTREAM: &str = "vndb";
const FIELDS: &str = "id, title, alttitle, image.url, description, released, rating";

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RawImage {
    pub url: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawVn {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub alttitle: Option<String>,
    #[serde(default)]
    pub image: Option<RawImage>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub released: Option<String>,
    /// 10 to 100.
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct VnResponse {
    results: Vec<RawVn>,
}

/// VNDB ids carry a `v` prefix; bare numbers are accepted too.
pub fn normalize_id(id: &str) -> String {
    let id = id.trim().to_lowercase();
    if id.starts_with('v') {
        id
    } else {
        format!("v{id}")
    }
}

#[derive(Clone)]
pub struct Vndb {
    client: UpstreamClient,
    url: Url,
}

impl Vndb {
    pub fn new(client: UpstreamClient, url: Url) -> Self {
        Vndb { client, url }
    }

    fn endpoint(&self) -> Url {
        let mut url = self.url.clone();
        let path = format!("{}/vn", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url
    }

    /// `id` must already be in `v123` form.
    pub async fn visual_novel(&self, id: &str) -> Result<Option<RawVn>, UpstreamError> {
        let body = json!({
            "filters": ["id", "=", id],
            "fields": FIELDS,
        });

        let result = self
            .client
            .post_json::<VnResponse, _>(UPSTREAM, self.endpoint(), &body)
            .await
            .map(|response| response.results.into_iter().next());
        found(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Upstreams;
    use crate::testutils::MockUpstream;
    use http::StatusCode;

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id("17"), "v17");
        assert_eq!(normalize_id("v17"), "v17");
        assert_eq!(normalize_id(" V17 "), "v17");
    }

    #[tokio::test]
    async fn test_visual_novel_query() {
        let mock = MockUpstream::start(|req| {
            let results = if req.body["filters"][2] == "v17" {
                json!([{"id": "v17", "title": "Ever17", "rating": 84.37}])
            } else {
                json!([])
            };
            (StatusCode::OK, json!({ "results": results, "more": false }))
        })
        .await;

        let client = UpstreamClient::new(&Upstreams::default()).unwrap();
        let vndb = Vndb::new(client, mock.url_with_path("kana"));

        let vn = vndb.visual_novel("v17").await.unwrap().unwrap();
        assert_eq!(vn.title.as_deref(), Some("Ever17"));
        assert_eq!(vndb.visual_novel("v99").await.unwrap(), None);

        let request = &mock.requests()[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/kana/vn");
        assert_eq!(request.body["filters"], json!(["id", "=", "v17"]));
    }
}
