//! The upstream release oracle client (spec.md §6): a `summary` endpoint
//! giving a monotonic sequence number and the list of known products, and
//! a per-product `versions/{product}` endpoint giving one row per region.
//! Both are semicolon-delimited, header-row-first text documents — the
//! wire format the oracle this system polls actually uses.

use mapscan_core::ReleaseId;
use reqwest::Client;

use crate::ratelimit::RateLimited;
use crate::ResolverError;

pub struct ProductSummary {
    pub sequence_number: u64,
    pub products: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct VersionRow {
    pub region: String,
    pub build_config: String,
    pub cdn_config: String,
    pub key_ring: Option<String>,
    pub build_id: u32,
    pub version_name: String,
    pub product_config: String,
}

impl VersionRow {
    /// The `(a, b)` pair a version string like `11.0.2.55555` gives for
    /// major/minor, paired with this row's own `build_id` (the `c`
    /// component — the primary monotonic discriminator, spec.md §3
    /// `ReleaseId`) and the epoch this resolver is configured for. The
    /// third dotted component (`2` above) is a patch level the oracle
    /// also reports redundantly in `build_id`; it is not packed.
    pub fn release_id(&self, epoch: u32) -> Result<ReleaseId, ResolverError> {
        let mut parts = self.version_name.split('.');
        let (Some(a), Some(b), Some(_patch), Some(_build)) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(ResolverError::Malformed(format!("bad version string: {}", self.version_name)));
        };
        let a: u32 = a.parse().map_err(|_| ResolverError::Malformed(format!("bad major: {a}")))?;
        let b: u32 = b.parse().map_err(|_| ResolverError::Malformed(format!("bad minor: {b}")))?;
        ReleaseId::pack(epoch, a, b, self.build_id).map_err(|e| ResolverError::Malformed(e.to_string()))
    }
}

/// An HTTP client for the version oracle, wrapped in the shared rate
/// limit / retry policy.
pub struct VersionOracle {
    http: Client,
    base_url: String,
    policy: RateLimited,
}

impl VersionOracle {
    pub fn new(base_url: impl Into<String>) -> Self {
        VersionOracle { http: Client::new(), base_url: base_url.into(), policy: RateLimited::default_policy() }
    }

    pub async fn summary(&self) -> Result<ProductSummary, ResolverError> {
        let url = format!("{}/summary", self.base_url);
        let body = self
            .policy
            .call(|| async {
                let resp = self.http.get(&url).send().await.map_err(|e| ResolverError::Transport(e.to_string()))?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(ResolverError::NotFound);
                }
                resp.error_for_status().map_err(|e| ResolverError::Transport(e.to_string()))?.text().await.map_err(|e| ResolverError::Transport(e.to_string()))
            })
            .await?;
        parse_summary(&body)
    }

    pub async fn versions(&self, product: &str) -> Result<Vec<VersionRow>, ResolverError> {
        let url = format!("{}/versions/{}", self.base_url, product);
        let body = self
            .policy
            .call(|| async {
                let resp = self.http.get(&url).send().await.map_err(|e| ResolverError::Transport(e.to_string()))?;
                if resp.status() == reqwest::StatusCode::NOT_FOUND {
                    return Err(ResolverError::NotFound);
                }
                resp.error_for_status().map_err(|e| ResolverError::Transport(e.to_string()))?.text().await.map_err(|e| ResolverError::Transport(e.to_string()))
            })
            .await?;
        parse_versions(&body)
    }
}

fn parse_summary(body: &str) -> Result<ProductSummary, ResolverError> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| ResolverError::Malformed("empty summary body".into()))?;
    let cols: Vec<&str> = header.split('|').collect();
    let seq_idx = cols
        .iter()
        .position(|c| *c == "Seqn!DEC:4")
        .ok_or_else(|| ResolverError::Malformed("summary missing Seqn column".into()))?;
    let product_idx = cols
        .iter()
        .position(|c| *c == "Product!STRING:0")
        .ok_or_else(|| ResolverError::Malformed("summary missing Product column".into()))?;

    let mut sequence_number = None;
    let mut products = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('|').collect();
        let Some(product) = fields.get(product_idx) else { continue };
        if let Some(seq) = fields.get(seq_idx) {
            if sequence_number.is_none() {
                sequence_number = seq.parse::<u64>().ok();
            }
        }
        products.push(product.to_string());
    }
    Ok(ProductSummary {
        sequence_number: sequence_number.ok_or_else(|| ResolverError::Malformed("summary missing sequence number".into()))?,
        products,
    })
}

fn parse_versions(body: &str) -> Result<Vec<VersionRow>, ResolverError> {
    let mut lines = body.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| ResolverError::Malformed("empty versions body".into()))?;
    let cols: Vec<&str> = header.split('|').map(|c| c.split('!').next().unwrap_or(c)).collect();

    let idx = |name: &str| cols.iter().position(|c| *c == name);
    let region_idx = idx("Region").ok_or_else(|| ResolverError::Malformed("versions missing Region".into()))?;
    let build_config_idx = idx("BuildConfig").ok_or_else(|| ResolverError::Malformed("versions missing BuildConfig".into()))?;
    let cdn_config_idx = idx("CDNConfig").ok_or_else(|| ResolverError::Malformed("versions missing CDNConfig".into()))?;
    let key_ring_idx = idx("KeyRing");
    let build_id_idx = idx("BuildId").ok_or_else(|| ResolverError::Malformed("versions missing BuildId".into()))?;
    let version_idx = idx("VersionsName").ok_or_else(|| ResolverError::Malformed("versions missing VersionsName".into()))?;
    let product_config_idx = idx("ProductConfig").ok_or_else(|| ResolverError::Malformed("versions missing ProductConfig".into()))?;

    let mut rows = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('|').collect();
        let get = |i: usize| fields.get(i).map(|s| s.to_string()).unwrap_or_default();
        let build_id: u32 = get(build_id_idx).parse().map_err(|_| ResolverError::Malformed("bad BuildId".into()))?;
        rows.push(VersionRow {
            region: get(region_idx),
            build_config: get(build_config_idx),
            cdn_config: get(cdn_config_idx),
            key_ring: key_ring_idx.map(|i| get(i)).filter(|s| !s.is_empty()),
            build_id,
            version_name: get(version_idx),
            product_config: get(product_config_idx),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_summary_rows() {
        let body = "Product!STRING:0|Seqn!DEC:4|Flags!STRING:0\n\
                     wow|2946583|\n\
                     wowt|2946583|\n";
        let summary = parse_summary(body).unwrap();
        assert_eq!(summary.sequence_number, 2946583);
        assert_eq!(summary.products, vec!["wow", "wowt"]);
    }

    #[test]
    fn parses_version_rows_and_release_id() {
        let body = "Region!STRING:0|BuildConfig!HEX:16|CDNConfig!HEX:16|KeyRing!HEX:16|BuildId!DEC:4|VersionsName!String:0|ProductConfig!HEX:16\n\
                     us|abc123|def456||55555|11.0.2.55555|fed654\n";
        let rows = parse_versions(body).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.region, "us");
        assert_eq!(row.build_id, 55555);
        assert!(row.key_ring.is_none());

        let release = row.release_id(0).unwrap();
        assert_eq!(release.decode(), (0, 11, 0, 55555));
        assert_eq!(row.build_id, 55555);
    }

    #[test]
    fn missing_sequence_number_is_malformed() {
        let body = "Product!STRING:0|Flags!STRING:0\nwow|\n";
        assert!(parse_summary(body).is_err());
    }
}
