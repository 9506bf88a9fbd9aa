use axum::{
    extract::{Path, State},
    Json,
};
use sqlx::PgPool;
use utoipa::OpenApi;

use super::{dto::LatestReadingDto, errors::AppError};
use crate::db::models::LatestReading;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Fetch the latest persisted reading for every farm.
#[utoipa::path(
    get,
    path = "/readings/latest",
    responses(
        (status = 200, description = "Latest reading per farm", body = Vec<LatestReadingDto>),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_all_latest(
    State(pool): State<PgPool>,
) -> Result<Json<Vec<LatestReadingDto>>, AppError> {
    let rows = sqlx::query_as::<_, LatestReading>(
        r#"
        SELECT serial_number, farm_id, paired,
               water_temperature, environment_temperature, co2, light_level,
               humidity, water_level, ph, electrical_conductivity, received_at
        FROM latest_readings
        ORDER BY serial_number
        "#,
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// Fetch the latest reading for one farm by serial number.
/// Returns `null` when no telemetry has been persisted yet.
#[utoipa::path(
    get,
    path = "/readings/{serial_number}/latest",
    params(
        ("serial_number" = String, Path, description = "Farm control-unit serial number"),
    ),
    responses(
        (status = 200, description = "Latest reading, or null", body = LatestReadingDto),
        (status = 500, description = "Internal server error"),
    ),
    tag = "readings"
)]
pub async fn get_latest(
    State(pool): State<PgPool>,
    Path(serial_number): Path<String>,
) -> Result<Json<Option<LatestReadingDto>>, AppError> {
    let row = sqlx::query_as::<_, LatestReading>(
        r#"
        SELECT serial_number, farm_id, paired,
               water_temperature, environment_temperature, co2, light_level,
               humidity, water_level, ph, electrical_conductivity, received_at
        FROM latest_readings
        WHERE serial_number = $1
        "#,
    )
    .bind(&serial_number)
    .fetch_optional(&pool)
    .await?;

    Ok(Json(row.map(Into::into)))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(get_all_latest, get_latest, health),
    components(schemas(LatestReadingDto)),
    tags(
        (name = "readings", description = "Latest telemetry per farm"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Hydrofarm Backend API",
        version = "0.1.0",
        description = "Query surface for persisted farm telemetry"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum_test::TestServer;
    use chrono::Utc;
    use serde_json::Value;
    use sqlx::PgPool;
    use uuid::Uuid;

    use crate::api::router;

    fn test_server(pool: PgPool) -> TestServer {
        TestServer::new(router(pool)).unwrap()
    }

    async fn insert_latest(pool: &PgPool, serial: &str, humidity: f64) {
        let farm_id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO farms (serial_number) VALUES ($1) RETURNING id",
        )
        .bind(serial)
        .fetch_one(pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            INSERT INTO latest_readings (
                serial_number, farm_id, paired,
                water_temperature, environment_temperature, co2, light_level,
                humidity, water_level, ph, electrical_conductivity, received_at
            )
            VALUES ($1, $2, true, 22, 25, 450, 80, $3, 7, 5.5, 1500, $4)
            "#,
        )
        .bind(serial)
        .bind(farm_id)
        .bind(humidity)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn all_latest_empty_returns_empty_array(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/readings/latest").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body, serde_json::json!([]));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn all_latest_returns_one_row_per_farm(pool: PgPool) {
        insert_latest(&pool, "F1", 40.0).await;
        insert_latest(&pool, "F2", 70.0).await;

        let server = test_server(pool);
        let resp = server.get("/readings/latest").await;
        resp.assert_status_ok();

        let body: Vec<Value> = resp.json();
        assert_eq!(body.len(), 2);
        assert_eq!(body[0]["serial_number"], "F1");
        assert_eq!(body[1]["serial_number"], "F2");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn latest_returns_null_for_unknown_serial(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/readings/unknown/latest").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert!(body.is_null());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn latest_returns_persisted_reading(pool: PgPool) {
        insert_latest(&pool, "F1", 55.5).await;

        let server = test_server(pool);
        let resp = server.get("/readings/F1/latest").await;
        resp.assert_status_ok();

        let body: Value = resp.json();
        assert_eq!(body["serial_number"], "F1");
        assert_eq!(body["humidity"], 55.5);
        assert_eq!(body["paired"], true);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn health_returns_ok(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/health").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["status"], "ok");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn openapi_spec_is_served(pool: PgPool) {
        let server = test_server(pool);
        let resp = server.get("/api-docs/openapi.json").await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["info"]["title"], "Hydrofarm Backend API");
    }
}
