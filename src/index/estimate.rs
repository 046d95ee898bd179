use crate::embed::ProviderKind;
use serde::Serialize;

/// What a full build would process, without calling any provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateReport {
    pub files: usize,
    pub code_chunks: usize,
    pub database_chunks: usize,
    pub estimated_tokens: usize,
    pub embedding_model: String,
    /// `None` for local providers
    pub estimated_cost_usd: Option<f64>,
    pub would_enrich: bool,
}

impl EstimateReport {
    pub fn total_chunks(&self) -> usize {
        self.code_chunks + self.database_chunks
    }
}

/// Embedding cost for `tokens` input tokens at the provider's published price
pub fn embedding_cost(kind: Option<&ProviderKind>, tokens: usize) -> Option<f64> {
    let price = kind?.price_per_million_tokens()?;
    Some(tokens as f64 / 1_000_000.0 * price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_cost() {
        let kind = ProviderKind::parse("openai:text-embedding-3-small").unwrap();
        let cost = embedding_cost(Some(&kind), 2_000_000).unwrap();
        assert!((cost - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_local_is_free() {
        let kind = ProviderKind::parse("hash:8").unwrap();
        assert_eq!(embedding_cost(Some(&kind), 1_000_000), None);
        assert_eq!(embedding_cost(None, 1_000_000), None);
    }
}
