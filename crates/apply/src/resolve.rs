use anyhow::{anyhow, Context, Result};
use kube::core::DynamicObject;
use octarine_kubehub::ResourceCoordinate;
use serde_json::Value as Json;
use tracing::debug;

/// Decoded payloads shorter than this (`null`, `{}`, `""`) are treated as no document.
const MIN_DOCUMENT_BYTES: usize = 6;

/// Kinds whose plural is not `kind + "s"`. Known-incomplete: every other kind
/// gets the suffix rule.
const IRREGULAR_PLURALS: &[(&str, &str)] = &[("logentry", "logentries"), ("kubernetes", "kuberneteses")];

/// Limits on a single manifest document, read from `OCTARINE_MANIFEST_MAX_BYTES`
/// and `OCTARINE_MANIFEST_MAX_NODES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentBudget {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for DocumentBudget {
    fn default() -> Self { Self { max_bytes: 4 << 20, max_nodes: 50_000 } }
}

impl DocumentBudget {
    pub fn from_env() -> Self {
        let d = Self::default();
        let read = |key: &str, fallback: usize| std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(fallback);
        Self { max_bytes: read("OCTARINE_MANIFEST_MAX_BYTES", d.max_bytes), max_nodes: read("OCTARINE_MANIFEST_MAX_NODES", d.max_nodes) }
    }

    fn check_size(&self, text: &str) -> Result<()> {
        if text.len() > self.max_bytes {
            return Err(anyhow!("manifest document is {} bytes, over the {} byte limit", text.len(), self.max_bytes));
        }
        Ok(())
    }

    /// Count values (containers and scalars) until the budget is spent.
    fn exceeds_nodes(&self, root: &Json) -> bool {
        let mut pending = vec![root];
        let mut seen = 0usize;
        while let Some(v) = pending.pop() {
            seen += 1;
            if seen > self.max_nodes {
                return true;
            }
            match v {
                Json::Object(map) => pending.extend(map.values()),
                Json::Array(items) => pending.extend(items.iter()),
                _ => {}
            }
        }
        false
    }
}

/// A document ready for dispatch: the object plus where it lives.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub object: DynamicObject,
    pub coordinate: ResourceCoordinate,
}

impl ResolvedDocument {
    pub fn name(&self) -> &str { self.object.metadata.name.as_deref().unwrap_or("") }
    pub fn kind(&self) -> &str { &self.coordinate.kind }
}

/// Lower-case the kind and pluralize it.
pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    match IRREGULAR_PLURALS.iter().find(|(k, _)| *k == lower) {
        Some((_, plural)) => plural.to_string(),
        None => lower + "s",
    }
}

/// Compute the store coordinate for an apiVersion/kind pair. `group/version`
/// and bare `version` are understood; any other shape leaves group and
/// version empty.
pub fn coordinate_for(api_version: &str, kind: &str) -> ResourceCoordinate {
    let parts: Vec<&str> = api_version.split('/').collect();
    let (group, version) = match parts.as_slice() {
        [group, version] => (*group, *version),
        [version] => ("", *version),
        _ => ("", ""),
    };
    ResourceCoordinate::new(group, version, &pluralize(kind), kind)
}

/// Decode one YAML document into JSON. `None` for empty/null documents.
pub fn decode_document(text: &str) -> Result<Option<Json>> {
    decode_within(text, &DocumentBudget::from_env())
}

fn decode_within(text: &str, budget: &DocumentBudget) -> Result<Option<Json>> {
    budget.check_size(text)?;
    let val: serde_yaml::Value = serde_yaml::from_str(text).context("unable to parse yaml")?;
    let json = serde_json::to_value(val).context("unable to convert yaml to json")?;
    let encoded_len = serde_json::to_string(&json).map(|s| s.len()).unwrap_or(0);
    if encoded_len < MIN_DOCUMENT_BYTES {
        debug!(encoded_len, "skipping empty document");
        return Ok(None);
    }
    if budget.exceeds_nodes(&json) {
        return Err(anyhow!("manifest document has more than {} values", budget.max_nodes));
    }
    Ok(Some(json))
}

fn is_list(json: &Json) -> bool {
    let kind_is_list = json.get("kind").and_then(Json::as_str).is_some_and(|k| k.ends_with("List"));
    kind_is_list && json.get("items").is_some_and(Json::is_array)
}

/// Turn one decoded object into a dispatchable document. A non-empty
/// `namespace` overrides the document's own.
pub fn resolve_object(mut json: Json, namespace: &str) -> Result<ResolvedDocument> {
    let api_version = json.get("apiVersion").and_then(Json::as_str).unwrap_or("").to_string();
    let kind = json.get("kind").and_then(Json::as_str).unwrap_or("").to_string();
    if let Some(map) = json.as_object_mut() {
        map.entry("metadata").or_insert_with(|| Json::Object(Default::default()));
    }
    let mut object: DynamicObject = serde_json::from_value(json).context("unable to unmarshal json created from yaml")?;
    if !namespace.is_empty() {
        object.metadata.namespace = Some(namespace.to_string());
    }
    let coordinate = coordinate_for(&api_version, &kind);
    debug!(group = %coordinate.group, version = %coordinate.version, plural = %coordinate.plural, "computed resource");
    Ok(ResolvedDocument { object, coordinate })
}

/// Resolve one document's text. List kinds expand into their items, in order.
pub fn resolve_documents(text: &str, namespace: &str) -> Result<Vec<ResolvedDocument>> {
    let Some(json) = decode_document(text)? else { return Ok(Vec::new()) };
    if is_list(&json) {
        let items = match json {
            Json::Object(mut map) => map.remove("items").and_then(|v| match v { Json::Array(a) => Some(a), _ => None }).unwrap_or_default(),
            _ => Vec::new(),
        };
        return items.into_iter().map(|item| resolve_object(item, namespace)).collect();
    }
    Ok(vec![resolve_object(json, namespace)?])
}
