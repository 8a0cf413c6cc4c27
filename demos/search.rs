// Searches BreweryDB for the words given on the command line.
//
//   BREWERYDB_API_KEY=... cargo run --example search -- pale ale
//
// Set BREWERYDB_FORMAT=xml to see the normalized XML shape instead of JSON.
use anyhow::{bail, Context};
use brewerydb_client::{BreweryDbClient, SearchKind, SearchQuery};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let words: Vec<String> = std::env::args().skip(1).collect();
    if words.is_empty() {
        bail!("usage: search <query words>");
    }

    let client = BreweryDbClient::from_env().context("building client from environment")?;
    let query = SearchQuery::new(words.join(" ")).kind(SearchKind::Beer);

    let response = client
        .search(&query)
        .await
        .with_context(|| format!("searching for {:?}", query.query))?;

    println!("GET {}", response.request_uri);
    println!("{}", serde_json::to_string_pretty(&response.data)?);
    if response.truncated {
        eprintln!("warning: part of the XML response was too deeply nested and was dropped");
    }
    Ok(())
}
