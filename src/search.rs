use crate::error::IndexerError;

/// Abstract full-text index. Spec §4.4 — optional, disabled cleanly when
/// not configured.
pub trait SearchIndex: Send + Sync {
    fn index(&self, idx: &str, doc_id: &str, body: &serde_json::Value) -> Result<(), IndexerError>;
    fn refresh(&self, idx: &str) -> Result<(), IndexerError>;
    fn close(&self) -> Result<(), IndexerError>;
}

/// No-op implementation used when `services.elastic.enabled` is false.
pub struct NullSearchIndex;

impl SearchIndex for NullSearchIndex {
    fn index(&self, _idx: &str, _doc_id: &str, _body: &serde_json::Value) -> Result<(), IndexerError> {
        Ok(())
    }

    fn refresh(&self, _idx: &str) -> Result<(), IndexerError> {
        Ok(())
    }

    fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

#[cfg(feature = "elastic")]
pub struct ElasticSearchIndex {
    client: reqwest::blocking::Client,
    node: String,
}

#[cfg(feature = "elastic")]
impl ElasticSearchIndex {
    pub fn new(node: &str) -> Self {
        ElasticSearchIndex {
            client: reqwest::blocking::Client::new(),
            node: node.trim_end_matches('/').to_string(),
        }
    }
}

#[cfg(feature = "elastic")]
impl SearchIndex for ElasticSearchIndex {
    fn index(&self, idx: &str, doc_id: &str, body: &serde_json::Value) -> Result<(), IndexerError> {
        let url = format!("{}/{}/_doc/{}", self.node, idx, doc_id);
        self.client
            .put(url)
            .json(body)
            .send()
            .map_err(|e| IndexerError::SearchError(e.to_string()))?
            .error_for_status()
            .map_err(|e| IndexerError::SearchError(e.to_string()))?;
        Ok(())
    }

    fn refresh(&self, idx: &str) -> Result<(), IndexerError> {
        let url = format!("{}/{}/_refresh", self.node, idx);
        self.client
            .post(url)
            .send()
            .map_err(|e| IndexerError::SearchError(e.to_string()))?
            .error_for_status()
            .map_err(|e| IndexerError::SearchError(e.to_string()))?;
        Ok(())
    }

    fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_search_index_is_always_a_noop() {
        let idx = NullSearchIndex;
        let body = serde_json::json!({"name": "x"});
        assert!(idx.index("videos", "abc", &body).is_ok());
        assert!(idx.refresh("videos").is_ok());
        assert!(idx.close().is_ok());
    }
}
