//! Content-distribution source for the profile icon dataset.
//!
//! The dataset is two JSON documents (icons and icon sets) plus one image per
//! icon. Every icon with an image becomes a [`SyncItem`] holding the image as
//! its asset and a data module as its document. The whole catalog also yields
//! a few aggregate documents (id index, title index, set tables), synced as
//! document-only items under reserved ids.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};
use crate::rate_limit::ApiRateLimiter;
use crate::sync::{AssetPayload, AssetState, DocumentPayload, ItemFeed, SyncItem};

/// Public game-data root on CommunityDragon.
pub const DEFAULT_BASE_URL: &str =
    "https://raw.communitydragon.org/latest/plugins/rcp-be-lol-game-data/global/default";

/// Default document page title; `{id}` is replaced by the icon id.
pub const DEFAULT_DOCUMENT_TITLE: &str = "Module:Profile-Icons/V1/icon/{id}";

/// Default asset file name; `{id}` and `{ext}` are replaced.
pub const DEFAULT_ASSET_NAME: &str = "Profile-Icons-V1-{id}.{ext}";

/// Default page prefix of the aggregate documents.
pub const DEFAULT_AGGREGATE_ROOT: &str = "Module:Profile-Icons/V1";

/// Images fetched ahead of the item being synced.
pub const DEFAULT_PREFETCH: usize = 10;

/// First ledger id reserved for aggregate documents. Icon ids at or above it
/// are rejected.
pub const AGGREGATE_ID_BASE: u32 = u32::MAX - 15;

/// Indentation of rendered Lua tables.
const LUA_INDENT: usize = 4;

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("could not decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed icon entry: {0}")]
    Malformed(String),

    #[error("unsupported image type '{mime}' for icon {id}")]
    UnsupportedMime { id: u32, mime: String },
}

/// File extension for an image media type.
pub fn extension_for(mime: &str) -> Option<&'static str> {
    match mime {
        "image/jpeg" => Some("jpeg"),
        "image/png" => Some("png"),
        _ => None,
    }
}

/// Naming of the store objects derived from an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemNaming {
    pub document_title: String,
    pub asset_name: String,
    /// Page text for newly uploaded assets.
    pub asset_description: Option<String>,
    /// Prefix of the aggregate document titles.
    pub aggregate_root: String,
}

impl Default for ItemNaming {
    fn default() -> Self {
        Self {
            document_title: DEFAULT_DOCUMENT_TITLE.to_string(),
            asset_name: DEFAULT_ASSET_NAME.to_string(),
            asset_description: None,
            aggregate_root: DEFAULT_AGGREGATE_ROOT.to_string(),
        }
    }
}

impl ItemNaming {
    pub fn document_title(&self, id: u32) -> String {
        self.document_title.replace("{id}", &id.to_string())
    }

    pub fn asset_name(&self, id: u32, ext: &str) -> String {
        self.asset_name
            .replace("{id}", &id.to_string())
            .replace("{ext}", ext)
    }

    pub fn aggregate_title(&self, aggregate: Aggregate) -> String {
        format!(
            "{}/{}",
            self.aggregate_root.trim_end_matches('/'),
            aggregate.suffix()
        )
    }
}

/// One entry of the icon-set file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IconSet {
    #[serde(default)]
    pub icons: Vec<u32>,
    /// Every other field of the entry except `id`.
    #[serde(flatten)]
    pub info: Map<String, Value>,
}

impl IconSet {
    pub fn display_name(&self) -> Option<&str> {
        self.info.get("displayName").and_then(Value::as_str)
    }
}

/// One dataset entry after transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct IconRecord {
    pub id: u32,
    /// The raw entry without `imagePath`, regional arrays keyed by region,
    /// and the names of the sets containing the icon.
    pub content: Value,
}

impl IconRecord {
    pub fn title(&self) -> Option<&str> {
        self.content.get("title").and_then(Value::as_str)
    }
}

/// Icon id to set names, in set-file order without repeats.
pub type SetBinding = HashMap<u32, Vec<String>>;

fn bind_sets(sets: &[IconSet]) -> SetBinding {
    let mut binding = SetBinding::new();
    for set in sets {
        let Some(name) = set.display_name() else {
            continue;
        };
        for id in &set.icons {
            let names = binding.entry(*id).or_default();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    binding
}

/// Turn `[{"region": "na", ...rest}, ...]` into `{"na": {...rest}, ...}`.
fn key_by_region(field: &str, value: Value) -> Result<Value, SourceError> {
    let Value::Array(items) = value else {
        return Err(SourceError::Malformed(format!("'{field}' is not an array")));
    };
    let mut keyed = Map::new();
    for item in items {
        let Value::Object(mut object) = item else {
            return Err(SourceError::Malformed(format!(
                "'{field}' contains a non-object element"
            )));
        };
        let Some(Value::String(region)) = object.remove("region") else {
            return Err(SourceError::Malformed(format!(
                "'{field}' element without a region"
            )));
        };
        keyed.insert(region, Value::Object(object));
    }
    Ok(Value::Object(keyed))
}

/// Whether a raw entry references an image. Entries without one are not
/// synchronized at all.
pub fn has_image(raw: &Value) -> bool {
    raw.get("imagePath").is_some()
}

/// Transform one raw dataset entry.
pub fn transform_entry(raw: Value, sets: &SetBinding) -> Result<IconRecord, SourceError> {
    let Value::Object(mut object) = raw else {
        return Err(SourceError::Malformed("entry is not an object".to_string()));
    };

    let id = object
        .get("id")
        .and_then(Value::as_u64)
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| SourceError::Malformed("entry without a valid 'id'".to_string()))?;
    if id >= AGGREGATE_ID_BASE {
        return Err(SourceError::Malformed(format!(
            "id {id} collides with the reserved aggregate range"
        )));
    }

    object.remove("imagePath");

    for field in ["descriptions", "rarities"] {
        if let Some(value) = object.remove(field) {
            object.insert(field.to_string(), key_by_region(field, value)?);
        }
    }

    let names = sets
        .get(&id)
        .map(|names| names.iter().cloned().map(Value::String).collect())
        .unwrap_or_default();
    object.insert("sets".to_string(), Value::Array(names));

    Ok(IconRecord {
        id,
        content: Value::Object(object),
    })
}

/// Escape the characters that would end or break a quoted string.
fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '"' | '\'' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
}

/// Numbers in their shortest form; integral floats print without a fraction.
fn number_text(n: &Number) -> String {
    if n.is_f64()
        && let Some(f) = n.as_f64()
        && f.is_finite()
        && f.fract() == 0.0
        && f.abs() < 1e21
    {
        return if f == 0.0 {
            "0".to_string()
        } else {
            format!("{f:.0}")
        };
    }
    n.to_string()
}

fn scalar_text(value: &Value, null: &str) -> String {
    match value {
        Value::Null => null.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_text(n),
        Value::String(s) => {
            let mut out = String::with_capacity(s.len() + 2);
            out.push('"');
            escape_into(s, &mut out);
            out.push('"');
            out
        }
        Value::Array(_) | Value::Object(_) => String::new(),
    }
}

/// The fingerprinted form of a document.
///
/// Object keys are sorted at every level and written as `"key": value`;
/// items are separated by a bare comma. Strings escape quotes, apostrophes,
/// backslashes, CR, LF and the two Unicode line separators, nothing else.
/// The result is not necessarily valid JSON.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('"');
                escape_into(key, out);
                out.push_str("\": ");
                write_canonical(&object[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar_text(scalar, "null")),
    }
}

/// Render `value` as a Lua table constructor, one field per line.
pub fn lua_table(value: &Value) -> String {
    let mut out = String::new();
    write_lua(value, 0, &mut out);
    out
}

fn write_lua(value: &Value, depth: usize, out: &mut String) {
    let fields: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let mut field = " ".repeat(LUA_INDENT * depth);
                write_lua(item, depth + 1, &mut field);
                field
            })
            .collect(),
        Value::Object(object) => object
            .iter()
            .map(|(key, item)| {
                let mut field = " ".repeat(LUA_INDENT * depth);
                field.push_str("[\"");
                escape_into(key, &mut field);
                field.push_str("\"] = ");
                write_lua(item, depth + 1, &mut field);
                field
            })
            .collect(),
        scalar => {
            out.push_str(&scalar_text(scalar, "nil"));
            return;
        }
    };

    let prefix = " ".repeat(LUA_INDENT);
    out.push_str("{\n");
    out.push_str(&prefix);
    out.push_str(&fields.join(format!(",\n{prefix}").as_str()));
    out.push('\n');
    out.push_str(&" ".repeat(LUA_INDENT * depth));
    out.push('}');
}

/// Page text of a Lua data module returning `value`.
pub fn render_document(value: &Value) -> String {
    format!("return {}", lua_table(value))
}

/// Whole-catalog documents published next to the per-icon modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    /// Every synced icon id, keyed by itself.
    Index,
    /// Icon ids grouped by title.
    TitleIndex,
    /// Set descriptions, without their member lists.
    Sets,
    /// Members of each set, in set-file order.
    SetMembers,
    /// For each icon, the 1-based positions of the sets containing it.
    SetIndex,
}

impl Aggregate {
    pub const ALL: [Aggregate; 5] = [
        Aggregate::Index,
        Aggregate::TitleIndex,
        Aggregate::Sets,
        Aggregate::SetMembers,
        Aggregate::SetIndex,
    ];

    /// Ledger id of the document in the document namespace.
    pub fn ledger_id(self) -> u32 {
        AGGREGATE_ID_BASE + self as u32
    }

    fn suffix(self) -> &'static str {
        match self {
            Aggregate::Index => "index",
            Aggregate::TitleIndex => "index/title",
            Aggregate::Sets => "sets",
            Aggregate::SetMembers => "sets/members",
            Aggregate::SetIndex => "sets/index",
        }
    }

    /// Document content built from the whole catalog.
    pub fn content(self, catalog: &Catalog) -> Value {
        match self {
            Aggregate::Index => Value::Object(
                catalog
                    .records
                    .iter()
                    .map(|record| (record.id.to_string(), Value::from(record.id)))
                    .collect(),
            ),
            Aggregate::TitleIndex => {
                let mut titles = Map::new();
                for record in &catalog.records {
                    let Some(title) = record.title() else {
                        continue;
                    };
                    if let Value::Array(ids) = titles
                        .entry(title.to_string())
                        .or_insert_with(|| Value::Array(Vec::new()))
                    {
                        ids.push(Value::from(record.id));
                    }
                }
                Value::Object(titles)
            }
            Aggregate::Sets => Value::Array(
                catalog
                    .sets
                    .iter()
                    .map(|set| Value::Object(set.info.clone()))
                    .collect(),
            ),
            Aggregate::SetMembers => Value::Array(
                catalog
                    .sets
                    .iter()
                    .map(|set| {
                        Value::Object(
                            set.icons
                                .iter()
                                .map(|icon| (icon.to_string(), Value::from(*icon)))
                                .collect(),
                        )
                    })
                    .collect(),
            ),
            Aggregate::SetIndex => {
                let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
                for (i, set) in catalog.sets.iter().enumerate() {
                    for icon in &set.icons {
                        let positions = index.entry(*icon).or_default();
                        if !positions.contains(&(i + 1)) {
                            positions.push(i + 1);
                        }
                    }
                }
                Value::Object(
                    index
                        .into_iter()
                        .map(|(icon, positions)| (icon.to_string(), Value::from(positions)))
                        .collect(),
                )
            }
        }
    }
}

/// The dataset as fetched from the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    /// Icons with an image, ordered by id.
    pub records: Vec<IconRecord>,
    /// Icon sets in file order, `id` removed.
    pub sets: Vec<IconSet>,
    /// Entries skipped because they reference no image.
    pub without_image: usize,
}

/// A fetched icon image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub mime: String,
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

/// Client for the icon dataset.
#[derive(Clone)]
pub struct IconSource {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
    limiter: ApiRateLimiter,
    naming: ItemNaming,
    prefetch: usize,
}

impl std::fmt::Debug for IconSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IconSource")
            .field("base_url", &self.base_url)
            .field("naming", &self.naming)
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

impl IconSource {
    pub fn new(
        base_url: &str,
        user_agent: &str,
        requests_per_second: u32,
        naming: ItemNaming,
    ) -> Result<Self, SourceError> {
        let transport = ReqwestTransport::with_session(user_agent, REQUEST_TIMEOUT)?;
        Ok(Self::new_with_transport(
            base_url,
            ApiRateLimiter::new(requests_per_second),
            naming,
            Arc::new(transport),
        ))
    }

    pub fn new_with_transport(
        base_url: &str,
        limiter: ApiRateLimiter,
        naming: ItemNaming,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            naming,
            prefetch: DEFAULT_PREFETCH,
        }
    }

    /// Number of images fetched ahead by feeds (0 is treated as 1).
    #[must_use]
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    pub fn naming(&self) -> &ItemNaming {
        &self.naming
    }

    async fn get(&self, url: String) -> Result<HttpResponse, SourceError> {
        self.limiter.wait().await;
        let response = self.transport.send(HttpRequest::get(url.clone())).await?;
        if !response.is_success() {
            return Err(SourceError::Status {
                status: response.status,
                url,
            });
        }
        Ok(response)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        let response = self.get(url.clone()).await?;
        serde_json::from_slice(&response.body).map_err(|source| SourceError::Decode { url, source })
    }

    /// Fetch and transform the whole dataset.
    pub async fn catalog(&self) -> Result<Catalog, SourceError> {
        let icons: Vec<Value> = self.get_json("/v1/summoner-icons.json").await?;
        let mut sets: Vec<IconSet> = self.get_json("/v1/summoner-icon-sets.json").await?;
        for set in &mut sets {
            set.info.remove("id");
        }
        let binding = bind_sets(&sets);

        let total = icons.len();
        let mut records = icons
            .into_iter()
            .filter(has_image)
            .map(|raw| transform_entry(raw, &binding))
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|record| record.id);

        let without_image = total - records.len();
        tracing::debug!(
            icons = records.len(),
            without_image,
            sets = sets.len(),
            "Fetched icon catalog"
        );
        Ok(Catalog {
            records,
            sets,
            without_image,
        })
    }

    /// Fetch the image of one icon.
    pub async fn fetch_image(&self, id: u32) -> Result<IconImage, SourceError> {
        let url = format!("{}/v1/profile-icons/{id}.jpg", self.base_url);
        let response = self.get(url).await?;
        let mime = response.mime().unwrap_or_default();
        let extension = extension_for(&mime).ok_or_else(|| SourceError::UnsupportedMime {
            id,
            mime: mime.clone(),
        })?;
        Ok(IconImage {
            mime,
            extension,
            bytes: response.body,
        })
    }

    fn document(&self, title: String, content: &Value) -> DocumentPayload {
        DocumentPayload {
            title,
            canonical: canonical_json(content),
            text: render_document(content),
        }
    }

    /// Build the sync item for a record, fetching its image.
    ///
    /// The document records the image type under `image`. Image failures do
    /// not fail the item: the asset is reported as unavailable and the
    /// document is still synchronized without that field.
    pub async fn load_item(&self, record: &IconRecord) -> SyncItem {
        let mut content = record.content.clone();
        let asset = match self.fetch_image(record.id).await {
            Ok(image) => {
                if let Value::Object(object) = &mut content {
                    let mut info = Map::new();
                    info.insert("mime".to_string(), Value::String(image.mime.clone()));
                    object.insert("image".to_string(), Value::Object(info));
                }
                AssetState::Ready(AssetPayload {
                    file_name: self.naming.asset_name(record.id, image.extension),
                    mime: image.mime,
                    bytes: image.bytes,
                    description: self.naming.asset_description.clone(),
                })
            }
            Err(err) => {
                tracing::warn!(id = record.id, error = %err, "Icon image unavailable");
                AssetState::Unavailable {
                    reason: err.to_string(),
                }
            }
        };

        SyncItem {
            id: record.id,
            asset,
            document: Some(self.document(self.naming.document_title(record.id), &content)),
        }
    }

    /// Document-only items for every [`Aggregate`] of `catalog`.
    pub fn aggregate_items(&self, catalog: &Catalog) -> Vec<SyncItem> {
        Aggregate::ALL
            .into_iter()
            .map(|aggregate| SyncItem {
                id: aggregate.ledger_id(),
                asset: AssetState::Absent,
                document: Some(self.document(
                    self.naming.aggregate_title(aggregate),
                    &aggregate.content(catalog),
                )),
            })
            .collect()
    }

    /// A feed over `records` that keeps up to `prefetch` image fetches in
    /// flight ahead of the consumer.
    pub fn feed(&self, records: Vec<IconRecord>) -> IconFeed {
        IconFeed {
            source: self.clone(),
            records: records.into_iter(),
            in_flight: VecDeque::new(),
            trailing: Vec::new().into_iter(),
        }
    }
}

/// Items of an [`IconSource`], loaded ahead in a bounded window.
#[derive(Debug)]
pub struct IconFeed {
    source: IconSource,
    records: std::vec::IntoIter<IconRecord>,
    in_flight: VecDeque<(IconRecord, JoinHandle<SyncItem>)>,
    /// Prepared items yielded after the records.
    trailing: std::vec::IntoIter<SyncItem>,
}

impl IconFeed {
    /// Yield `items` once every record has been yielded.
    #[must_use]
    pub fn with_items(mut self, items: Vec<SyncItem>) -> Self {
        let mut trailing: Vec<SyncItem> = std::mem::take(&mut self.trailing).collect();
        trailing.extend(items);
        self.trailing = trailing.into_iter();
        self
    }

    fn fill(&mut self) {
        while self.in_flight.len() < self.source.prefetch {
            let Some(record) = self.records.next() else {
                break;
            };
            let source = self.source.clone();
            let task_record = record.clone();
            let handle = tokio::spawn(async move { source.load_item(&task_record).await });
            self.in_flight.push_back((record, handle));
        }
    }
}

#[async_trait]
impl ItemFeed for IconFeed {
    fn size_hint(&self) -> Option<usize> {
        Some(self.in_flight.len() + self.records.len() + self.trailing.len())
    }

    async fn next_item(&mut self) -> Option<SyncItem> {
        self.fill();
        let Some((record, handle)) = self.in_flight.pop_front() else {
            return self.trailing.next();
        };
        match handle.await {
            Ok(item) => Some(item),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                tracing::warn!(id = record.id, error = %err, "Icon load cancelled");
                Some(SyncItem {
                    id: record.id,
                    asset: AssetState::Unavailable {
                        reason: err.to_string(),
                    },
                    document: Some(self.source.document(
                        self.source.naming.document_title(record.id),
                        &record.content,
                    )),
                })
            }
        }
    }
}

impl Drop for IconFeed {
    fn drop(&mut self) {
        for (_, handle) in &self.in_flight {
            handle.abort();
        }
    }
}
