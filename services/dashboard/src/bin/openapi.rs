//! services/dashboard/src/bin/openapi.rs
//!
//! Writes the OpenAPI document of the dashboard's REST surface, by default to
//! `openapi.json` in the current directory.

use dashboard_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

/// Serializes `api_doc` to `path` and returns the number of documented paths.
fn write_spec(
    api_doc: &utoipa::openapi::OpenApi,
    path: &str,
) -> Result<usize, Box<dyn std::error::Error>> {
    std::fs::write(path, api_doc.to_pretty_json()?)?;
    Ok(api_doc.paths.paths.len())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    let documented = write_spec(&ApiDoc::openapi(), &path)?;
    println!("OpenAPI specification with {} paths written to {}", documented, path);
    Ok(())
}
