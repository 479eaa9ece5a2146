/// Public block-explorer links for anchor transactions.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerLink {
    pub label: String,
    pub url: String,
}

fn subdomain(network: &str) -> &'static str {
    match network {
        "preview" => "preview.",
        "preprod" => "preprod.",
        _ => "",
    }
}

/// Transaction links for `network`, primary explorer first.
pub fn links(network: &str, tx_id: &str) -> Vec<ExplorerLink> {
    let sub = subdomain(network);
    vec![
        ExplorerLink {
            label: "cexplorer".to_string(),
            url: format!("https://{sub}cexplorer.io/tx/{tx_id}"),
        },
        ExplorerLink {
            label: "cardanoscan".to_string(),
            url: format!("https://{sub}cardanoscan.io/transaction/{tx_id}"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_per_network() {
        let preview = links("preview", "abc");
        assert_eq!(preview[0].url, "https://preview.cexplorer.io/tx/abc");
        assert_eq!(preview[1].url, "https://preview.cardanoscan.io/transaction/abc");

        let mainnet = links("mainnet", "abc");
        assert_eq!(mainnet[0].url, "https://cexplorer.io/tx/abc");
    }
}
