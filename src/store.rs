use crate::models::{TrackedSeries, SERIES_PARTITION};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::env;

const TABLE_NAME: &str = "series";
const STORAGE_API_VERSION: &str = "2019-02-02";

type HmacSha256 = Hmac<Sha256>;

/// Keyed-record persistence for tracked series.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Insert-or-replace keyed by show id.
    async fn save(&self, series: &TrackedSeries) -> Result<()>;
    async fn query(&self, filter: &SeriesFilter) -> Result<Vec<TrackedSeries>>;
    /// Exists at the storage layer; the HTTP surface never calls it.
    async fn delete(&self, id: u32) -> Result<()>;
}

/// Equality predicate over the partition and the running flag, rendered to
/// an OData `$filter` expression for the table service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesFilter {
    pub partition: String,
    pub is_running: Option<bool>,
}

impl SeriesFilter {
    pub fn running() -> Self {
        Self {
            partition: SERIES_PARTITION.to_string(),
            is_running: Some(true),
        }
    }

    pub fn to_odata(&self) -> String {
        let mut filter = format!("PartitionKey eq '{}'", self.partition.replace('\'', "''"));
        if let Some(running) = self.is_running {
            filter.push_str(&format!(" and IsRunning eq {running}"));
        }
        filter
    }
}

/// Azure Table storage client over the REST API with SharedKeyLite auth.
#[derive(Debug, Clone)]
pub struct TableClient {
    client: Client,
    account: String,
    key: Vec<u8>,
    endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SeriesRow {
    #[serde(rename = "PartitionKey")]
    partition_key: String,
    #[serde(rename = "RowKey")]
    row_key: String,
    #[serde(rename = "Id")]
    id: u32,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "IsRunning")]
    is_running: bool,
}

impl From<&TrackedSeries> for SeriesRow {
    fn from(series: &TrackedSeries) -> Self {
        Self {
            partition_key: SERIES_PARTITION.to_string(),
            row_key: series.id.to_string(),
            id: series.id,
            name: series.name.clone(),
            is_running: series.is_running,
        }
    }
}

impl From<SeriesRow> for TrackedSeries {
    fn from(row: SeriesRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            is_running: row.is_running,
        }
    }
}

impl TableClient {
    pub fn from_env() -> Result<Self> {
        let conn = env::var("TABLE_CONNECTION_STRING")
            .context("TABLE_CONNECTION_STRING not set")?;
        Self::from_connection_string(&conn)
    }

    pub fn from_connection_string(conn: &str) -> Result<Self> {
        let mut account = None;
        let mut key = None;
        let mut table_endpoint = None;
        let mut suffix = "core.windows.net".to_string();

        for pair in conn.split(';').filter(|p| !p.is_empty()) {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed connection string segment '{}'", pair))?;
            match name {
                "AccountName" => account = Some(value.to_string()),
                "AccountKey" => key = Some(value.to_string()),
                "TableEndpoint" => table_endpoint = Some(value.trim_end_matches('/').to_string()),
                "EndpointSuffix" => suffix = value.to_string(),
                _ => {}
            }
        }

        let account = account.ok_or_else(|| anyhow!("Connection string has no AccountName"))?;
        let key = key.ok_or_else(|| anyhow!("Connection string has no AccountKey"))?;
        let key = BASE64
            .decode(key)
            .context("AccountKey is not valid base64")?;
        let endpoint =
            table_endpoint.unwrap_or_else(|| format!("https://{account}.table.{suffix}"));

        Ok(Self {
            client: Client::new(),
            account,
            key,
            endpoint,
        })
    }

    fn entity_resource(id: u32) -> String {
        format!("{TABLE_NAME}(PartitionKey='{SERIES_PARTITION}',RowKey='{id}')")
    }

    /// SharedKeyLite for the table service signs only the date and the
    /// canonicalized resource (query string excluded).
    fn authorize(
        &self,
        req: reqwest::RequestBuilder,
        resource: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let string_to_sign = format!("{}\n/{}/{}", date, self.account, resource);
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| anyhow!("AccountKey has an invalid length"))?;
        mac.update(string_to_sign.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        Ok(req
            .header("x-ms-date", date)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(
                "Authorization",
                format!("SharedKeyLite {}:{}", self.account, signature),
            )
            .header("Accept", "application/json;odata=nometadata")
            .header("DataServiceVersion", "3.0;NetFx"))
    }
}

#[async_trait]
impl SeriesStore for TableClient {
    async fn save(&self, series: &TrackedSeries) -> Result<()> {
        let resource = Self::entity_resource(series.id);
        let url = format!("{}/{}", self.endpoint, resource);
        let req = self
            .authorize(self.client.put(&url), &resource)?
            .json(&SeriesRow::from(series));
        let res = req.send().await.context("table upsert failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("Upsert of series {} -> {} {}", series.id, status, body));
        }
        Ok(())
    }

    async fn query(&self, filter: &SeriesFilter) -> Result<Vec<TrackedSeries>> {
        #[derive(Deserialize)]
        struct QueryResponse {
            value: Vec<SeriesRow>,
        }

        let resource = format!("{TABLE_NAME}()");
        let url = format!(
            "{}/{}?$filter={}",
            self.endpoint,
            resource,
            urlencoding::encode(&filter.to_odata())
        );
        let req = self.authorize(self.client.get(&url), &resource)?;
        let res = req.send().await.context("table query failed")?;
        let status = res.status();
        let text = res.text().await.context("reading table response failed")?;
        if !status.is_success() {
            return Err(anyhow!("Series query -> {} {}", status, text));
        }
        let parsed: QueryResponse =
            serde_json::from_str(&text).context("table response parse failed")?;
        Ok(parsed.value.into_iter().map(TrackedSeries::from).collect())
    }

    async fn delete(&self, id: u32) -> Result<()> {
        let resource = Self::entity_resource(id);
        let url = format!("{}/{}", self.endpoint, resource);
        let req = self
            .authorize(self.client.delete(&url), &resource)?
            .header("If-Match", "*");
        let res = req.send().await.context("table delete failed")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("Delete of series {} -> {} {}", id, status, body));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cloud_connection_string() {
        let client = TableClient::from_connection_string(
            "DefaultEndpointsProtocol=https;AccountName=shows;AccountKey=c2VjcmV0;EndpointSuffix=core.windows.net",
        )
        .unwrap();
        assert_eq!(client.account, "shows");
        assert_eq!(client.key, b"secret");
        assert_eq!(client.endpoint, "https://shows.table.core.windows.net");
    }

    #[test]
    fn explicit_table_endpoint_wins() {
        let client = TableClient::from_connection_string(
            "AccountName=devstoreaccount1;AccountKey=c2VjcmV0;TableEndpoint=http://127.0.0.1:10002/devstoreaccount1/;",
        )
        .unwrap();
        assert_eq!(
            client.endpoint,
            "http://127.0.0.1:10002/devstoreaccount1"
        );
    }

    #[test]
    fn missing_account_key_is_an_error() {
        let err = TableClient::from_connection_string("AccountName=shows").unwrap_err();
        assert!(err.to_string().contains("AccountKey"));
    }

    #[test]
    fn running_filter_renders_both_predicates() {
        assert_eq!(
            SeriesFilter::running().to_odata(),
            "PartitionKey eq 'Series' and IsRunning eq true"
        );
    }

    #[test]
    fn partition_quotes_are_escaped() {
        let filter = SeriesFilter {
            partition: "O'Brien".to_string(),
            is_running: None,
        };
        assert_eq!(filter.to_odata(), "PartitionKey eq 'O''Brien'");
    }
}
