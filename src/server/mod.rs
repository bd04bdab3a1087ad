//! HTTP server bootstrap: build shared state once, bind, serve. The
//! startup banner lists this crate's actual JSON routes.

pub mod routes;
pub mod state;

pub use state::AppState;

use std::sync::Arc;

use crate::config::Config;

pub async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    let state = AppState::build(cfg).await?;
    let app = routes::create_router(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await {
        Ok(l) => l,
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            eprintln!("\nError: port {port} is already in use.\n");
            eprintln!("Try a different port with:");
            eprintln!("  docuquery serve --port <PORT>");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    println!("Server running on http://localhost:{port}");
    println!("\nAPI Endpoints:");
    println!("  GET    /health                            - Health check");
    println!("  POST   /api/uploads                        - Ingest a batch of files");
    println!("  GET    /api/uploads                        - List uploads");
    println!("  GET    /api/uploads/:id                    - Upload status + documents");
    println!("  GET    /api/documents?upload_id=            - List documents in an upload");
    println!("  GET    /api/documents/:id                  - Document metadata");
    println!("  DELETE /api/documents/:id                  - Delete a document");
    println!("  GET    /api/documents/:id/indexing-status  - Indexing progress");
    println!("  POST   /api/documents/:id/reindex          - Force re-embedding");
    println!("  POST   /api/queries                        - Ask a question");
    println!("  GET    /api/queries                        - Query history");
    println!("  GET    /api/queries/:id                    - A past query");

    axum::serve(listener, app).await?;
    Ok(())
}
