use axum::response::Json;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
}

pub async fn healthcheck() -> Json<Status> {
    Json(Status {
        status: "API is running".into(),
    })
}
