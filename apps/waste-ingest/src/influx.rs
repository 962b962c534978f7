use crate::config::StoreConfig;
use crate::point::Point;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use std::future::Future;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store url: {0}")]
    Url(#[from] url::ParseError),
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store rejected write with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Destination for ingested points.
pub trait PointWriter: Send + Sync + 'static {
    fn write(&self, point: &Point) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// InfluxDB v2 `/api/v2/write` client, one line-protocol line per request.
pub struct InfluxWriter {
    client: Client,
    write_url: Url,
    token: String,
}

impl InfluxWriter {
    pub fn new(store: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(store.timeout).build()?;
        let write_url = write_url(&store.url, &store.org, &store.bucket)?;
        Ok(Self {
            client,
            write_url,
            token: store.token.clone(),
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

pub fn write_url(base: &Url, org: &str, bucket: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base.join("api/v2/write")?;
    url.query_pairs_mut()
        .clear()
        .append_pair("org", org)
        .append_pair("bucket", bucket)
        .append_pair("precision", "ns");
    Ok(url)
}

impl PointWriter for InfluxWriter {
    async fn write(&self, point: &Point) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(point.to_line_protocol())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::DEFAULT_MEASUREMENT;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::Router;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use waste_core::{Reading, Status};

    #[derive(Debug, Clone)]
    struct Captured {
        query: HashMap<String, String>,
        authorization: Option<String>,
        content_type: Option<String>,
        body: String,
    }

    type Captures = Arc<Mutex<Vec<Captured>>>;

    async fn capture(
        State(captures): State<Captures>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: String,
    ) -> StatusCode {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        captures.lock().unwrap().push(Captured {
            query,
            authorization: header("authorization"),
            content_type: header("content-type"),
            body,
        });
        StatusCode::NO_CONTENT
    }

    async fn reject() -> (StatusCode, &'static str) {
        (StatusCode::UNAUTHORIZED, "{\"code\":\"unauthorized\"}")
    }

    async fn serve(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn store(url: Url) -> StoreConfig {
        StoreConfig {
            url,
            token: "secret-token".to_string(),
            org: "IoTOrg".to_string(),
            bucket: "waste-data".to_string(),
            measurement: DEFAULT_MEASUREMENT.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    fn point() -> Point {
        let reading = Reading {
            device_id: "cont-003".to_string(),
            zone: "zone_south".to_string(),
            current_level: 40,
            fill_percentage: 50.0,
            temperature: 22.5,
            capacity: 80,
            latitude: 32.5049,
            longitude: -117.0482,
            timestamp: Utc::now(),
            status: Status::Normal,
        };
        Point::from_reading(DEFAULT_MEASUREMENT, &reading, Utc::now())
    }

    #[test]
    fn write_url_keeps_base_path() {
        let base = Url::parse("http://influx.local:8086/proxy").unwrap();
        let url = write_url(&base, "IoT Org", "waste-data").unwrap();
        assert_eq!(
            url.as_str(),
            "http://influx.local:8086/proxy/api/v2/write?org=IoT+Org&bucket=waste-data&precision=ns"
        );
    }

    #[tokio::test]
    async fn write_posts_line_protocol_with_token() {
        let captures: Captures = Arc::default();
        let app = Router::new()
            .route("/api/v2/write", post(capture))
            .with_state(captures.clone());
        let writer = InfluxWriter::new(&store(serve(app).await)).unwrap();

        let point = point();
        writer.write(&point).await.unwrap();

        let captured = captures.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        let request = &captured[0];
        assert_eq!(request.query.get("org").map(String::as_str), Some("IoTOrg"));
        assert_eq!(request.query.get("bucket").map(String::as_str), Some("waste-data"));
        assert_eq!(request.query.get("precision").map(String::as_str), Some("ns"));
        assert_eq!(request.authorization.as_deref(), Some("Token secret-token"));
        assert_eq!(
            request.content_type.as_deref(),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(request.body, point.to_line_protocol());
    }

    #[tokio::test]
    async fn non_success_status_is_a_store_error() {
        let app = Router::new().route("/api/v2/write", post(reject));
        let writer = InfluxWriter::new(&store(serve(app).await)).unwrap();

        match writer.write(&point()).await {
            Err(StoreError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("unauthorized"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_store_is_a_store_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{addr}")).unwrap();
        let writer = InfluxWriter::new(&store(url)).unwrap();
        assert!(matches!(
            writer.write(&point()).await,
            Err(StoreError::Http(_))
        ));
    }
}
