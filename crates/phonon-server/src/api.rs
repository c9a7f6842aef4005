use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use phonon_client::{MiningReport, RedeemedPhonon, Session};
use phonon_shared::currency::currency_for;
use phonon_shared::{Card, CardId, Denomination, Direction, Phonon, ProposalStatus, TransferProposal};
use phonon_store::{ActivityEntry, ConfigurableSettings};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/listSessions", get(list_sessions))
        .route("/genMock", post(gen_mock))
        .route("/cards/:id", axum::routing::delete(remove_card))
        .route("/cards/:id/init", post(init_card))
        .route("/cards/:id/unlock", post(unlock_card))
        .route("/cards/:id/lock", post(lock_card))
        .route("/cards/:id/name", post(set_name))
        .route("/cards/:id/tray", post(set_tray))
        .route("/cards/:id/listPhonons", get(list_phonons))
        .route("/cards/:id/phonons", post(add_phonons))
        .route("/cards/:id/phonons/remove", post(remove_phonons))
        .route("/cards/:id/phonon/create", post(create_phonon))
        .route("/cards/:id/phonon/redeem", post(redeem_phonons))
        .route("/cards/:id/phonon/mineNative", post(start_mining))
        .route("/cards/:id/phonon/mineNative/cancel", post(cancel_mining))
        .route("/cards/:id/phonon/mineNative/status", get(mining_reports))
        .route("/cards/:id/phonon/mineNative/status/:attempt_id", get(mining_report))
        .route("/cards/:id/proposals/:direction", get(get_proposal))
        .route("/cards/:id/proposals/:direction/phonons", post(stage_phonons))
        .route("/cards/:id/proposals/:direction/remove", post(unstage_phonons))
        .route("/cards/:id/proposals/:direction/validate", post(validate_proposal))
        .route("/cards/:id/proposals/:direction/accept", post(accept_proposal))
        .route("/cards/:id/proposals/:direction/decline", post(decline_proposal))
        .route("/cards/:id/proposals/:direction/reset", post(reset_proposal))
        .route("/cards/:id/proposals/:direction/status", post(set_proposal_status))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/history", get(get_history).delete(clear_history))
        .route("/checkDenomination", post(check_denomination))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    cards: usize,
}

#[derive(Deserialize)]
struct PinRequest {
    pin: String,
}

#[derive(Deserialize)]
struct NameRequest {
    name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrayRequest {
    in_tray: bool,
}

#[derive(Deserialize)]
struct AddressesRequest {
    addresses: Vec<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct AcceptRequest {
    ignore_validation: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePhononRequest {
    currency_type: u16,
    denomination: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct MineRequest {
    difficulty: Option<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MineResponse {
    attempt_id: String,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: ProposalStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DenominationRequest {
    denomination: String,
    #[serde(default)]
    currency_type: Option<u16>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DenominationResponse {
    denomination: Denomination,
    base: u8,
    exponent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<String>,
}

fn card_id(id: String) -> CardId {
    CardId::new(id)
}

fn direction(raw: &str) -> Result<Direction, ServerError> {
    raw.parse().map_err(ServerError::BadRequest)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        cards: state.session.cards().len(),
    })
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<Card>> {
    Json(state.session.cards())
}

async fn gen_mock(State(state): State<AppState>) -> Result<(StatusCode, Json<Card>), ServerError> {
    let card = state.session.create_mock_card()?;
    Ok((StatusCode::CREATED, Json(card)))
}

async fn remove_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ServerError> {
    let id = card_id(id);
    state.session.card(&id)?;
    state.session.remove_cards(&[id]);
    Ok(StatusCode::NO_CONTENT)
}

async fn unlock_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PinRequest>,
) -> Result<Json<Card>, ServerError> {
    let card = state.session.unlock_card(&card_id(id), &req.pin).await?;
    Ok(Json(card))
}

async fn init_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PinRequest>,
) -> Result<StatusCode, ServerError> {
    state.session.init_card(&card_id(id), &req.pin).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lock_card(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Card>, ServerError> {
    Ok(Json(state.session.lock_card(&card_id(id))?))
}

async fn set_name(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NameRequest>,
) -> Result<Json<Card>, ServerError> {
    Ok(Json(state.session.set_vanity_name(&card_id(id), req.name)?))
}

async fn set_tray(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TrayRequest>,
) -> Result<Json<Card>, ServerError> {
    Ok(Json(state.session.set_in_tray(&card_id(id), req.in_tray)?))
}

async fn list_phonons(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Phonon>>, ServerError> {
    Ok(Json(state.session.card(&card_id(id))?.phonons))
}

async fn add_phonons(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(phonons): Json<Vec<Phonon>>,
) -> Result<Json<Card>, ServerError> {
    Ok(Json(state.session.add_phonons_to_card(&card_id(id), phonons)?))
}

async fn remove_phonons(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddressesRequest>,
) -> Result<Json<Card>, ServerError> {
    Ok(Json(
        state
            .session
            .remove_phonons_from_card(&card_id(id), &req.addresses)?,
    ))
}

// ─── Phonon lifecycle ───

async fn create_phonon(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreatePhononRequest>,
) -> Result<(StatusCode, Json<Phonon>), ServerError> {
    let denomination = Denomination::parse(&req.denomination)?;
    let phonon = state
        .session
        .create_phonon(&card_id(id), req.currency_type, denomination)
        .await?;
    Ok((StatusCode::CREATED, Json(phonon)))
}

async fn redeem_phonons(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AddressesRequest>,
) -> Result<Json<Vec<RedeemedPhonon>>, ServerError> {
    Ok(Json(
        state
            .session
            .redeem_phonons(&card_id(id), &req.addresses)
            .await?,
    ))
}

/// Mining runs in the background; poll the status endpoint with the id.
async fn start_mining(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<MineRequest>>,
) -> Result<(StatusCode, Json<MineResponse>), ServerError> {
    let Json(req) = body.unwrap_or_default();
    let attempt_id = state.session.start_mining(&card_id(id), req.difficulty)?;
    Ok((StatusCode::ACCEPTED, Json(MineResponse { attempt_id })))
}

async fn cancel_mining(
    State(state): State<AppState>,
    Path(_id): Path<String>,
) -> Result<Json<MineResponse>, ServerError> {
    let attempt_id = state.session.cancel_mining()?;
    Ok(Json(MineResponse { attempt_id }))
}

async fn mining_reports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<MiningReport>> {
    let id = card_id(id);
    Json(
        state
            .session
            .mining_reports()
            .into_iter()
            .filter(|r| r.card_id == id)
            .collect(),
    )
}

async fn mining_report(
    State(state): State<AppState>,
    Path((_id, attempt_id)): Path<(String, String)>,
) -> Result<Json<MiningReport>, ServerError> {
    Ok(Json(state.session.mining_report(&attempt_id)?))
}

// ─── Proposals ───

async fn get_proposal(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
) -> Result<Json<TransferProposal>, ServerError> {
    Ok(Json(state.session.proposal(&card_id(id), direction(&dir)?)?))
}

async fn stage_phonons(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
    Json(phonons): Json<Vec<Phonon>>,
) -> Result<Json<TransferProposal>, ServerError> {
    let proposal = state
        .session
        .add_phonons_to_proposal(&card_id(id), phonons, direction(&dir)?)?;
    Ok(Json(proposal))
}

async fn unstage_phonons(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
    Json(req): Json<AddressesRequest>,
) -> Result<Json<TransferProposal>, ServerError> {
    let proposal = state.session.remove_phonons_from_proposal(
        &card_id(id),
        &req.addresses,
        direction(&dir)?,
    )?;
    Ok(Json(proposal))
}

/// Validation runs in the background; poll the proposal for the outcome.
async fn validate_proposal(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
) -> Result<(StatusCode, Json<TransferProposal>), ServerError> {
    let id = card_id(id);
    let dir = direction(&dir)?;
    state.session.start_validation(&id, dir)?;
    info!(card_id = %id, direction = %dir, "validation started");
    Ok((StatusCode::ACCEPTED, Json(state.session.proposal(&id, dir)?)))
}

/// Transfer runs in the background, like validation.  An empty body means
/// no override.
async fn accept_proposal(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
    body: Option<Json<AcceptRequest>>,
) -> Result<(StatusCode, Json<TransferProposal>), ServerError> {
    let id = card_id(id);
    let dir = direction(&dir)?;
    let Json(req) = body.unwrap_or_default();
    state
        .session
        .start_transfer(&id, dir, req.ignore_validation)?;
    info!(card_id = %id, direction = %dir, "transfer started");
    Ok((StatusCode::ACCEPTED, Json(state.session.proposal(&id, dir)?)))
}

async fn decline_proposal(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
) -> Result<Json<TransferProposal>, ServerError> {
    let id = card_id(id);
    let dir = direction(&dir)?;
    state.session.decline_proposal(&id, dir)?;
    Ok(Json(state.session.proposal(&id, dir)?))
}

async fn reset_proposal(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
) -> Result<Json<TransferProposal>, ServerError> {
    let id = card_id(id);
    let dir = direction(&dir)?;
    state.session.reset_proposal(&id, dir)?;
    Ok(Json(state.session.proposal(&id, dir)?))
}

async fn set_proposal_status(
    State(state): State<AppState>,
    Path((id, dir)): Path<(String, String)>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<TransferProposal>, ServerError> {
    let id = card_id(id);
    let dir = direction(&dir)?;
    state.session.update_proposal_status(&id, dir, req.status)?;
    Ok(Json(state.session.proposal(&id, dir)?))
}

// ─── Settings and history ───

async fn get_settings(State(state): State<AppState>) -> Json<ConfigurableSettings> {
    Json(state.session.settings())
}

async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<ConfigurableSettings>,
) -> Result<Json<ConfigurableSettings>, ServerError> {
    Ok(Json(state.session.update_settings(settings)?))
}

async fn get_history(State(state): State<AppState>) -> Json<Vec<ActivityEntry>> {
    Json(state.session.activity())
}

async fn clear_history(State(state): State<AppState>) -> Result<StatusCode, ServerError> {
    state.session.clear_activity()?;
    Ok(StatusCode::NO_CONTENT)
}

/// Whether a decimal amount fits the card's `base * 10^exponent` encoding.
async fn check_denomination(
    Json(req): Json<DenominationRequest>,
) -> Result<Json<DenominationResponse>, ServerError> {
    let denomination = Denomination::parse(&req.denomination)?;
    let (base, exponent) = denomination.to_parts()?;
    let display = req
        .currency_type
        .and_then(currency_for)
        .map(|c| format!("{} {}", denomination.to_display(c.decimals), c.ticker));
    Ok(Json(DenominationResponse {
        denomination,
        base,
        exponent,
        display,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use phonon_client::{ClientConfig, SimulatedDevice};
    use phonon_store::Database;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const CARD_A: &str = "04e0d5eb884a73cf";
    const CARD_B: &str = "04e0d5eb884a73ce";

    fn state() -> AppState {
        let session = Session::with_device(
            Database::open_in_memory().unwrap(),
            Arc::new(SimulatedDevice::instant()),
            ClientConfig::default(),
        );
        let phonons = vec![
            Phonon::new("0xp1", 2, Denomination::parse("1000000000000000000").unwrap()).with_chain_id(1),
            Phonon::new("0xp2", 2, Denomination::parse("500000000000000000").unwrap()).with_chain_id(1),
        ];
        session.add_cards(vec![
            Card::new(CARD_A).unlocked().with_phonons(phonons),
            Card::new(CARD_B).unlocked(),
        ]);
        AppState {
            session: Arc::new(session),
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_and_listing() {
        let app = build_router(state());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cards"], 2);

        let (_, body) = call(&app, "GET", "/listSessions", None).await;
        assert_eq!(body[0]["CardId"], CARD_A);
        assert_eq!(body[0]["Phonons"][0]["ChainID"], 1);
    }

    #[tokio::test]
    async fn unknown_card_is_404() {
        let app = build_router(state());
        let (status, body) = call(&app, "GET", "/cards/nope/listPhonons", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn mock_and_unlock() {
        let app = build_router(state());
        let (status, card) = call(&app, "POST", "/genMock", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = card["CardId"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/cards/{id}/unlock"),
            Some(json!({ "pin": "000000" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, card) = call(
            &app,
            "POST",
            &format!("/cards/{id}/unlock"),
            Some(json!({ "pin": "111111" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["IsLocked"], false);

        let (status, _) = call(&app, "DELETE", &format!("/cards/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn stage_validate_and_accept() {
        let state = state();
        let app = build_router(state.clone());
        let phonons = serde_json::to_value(
            state.session.card(&CARD_A.into()).unwrap().phonons,
        )
        .unwrap();

        let uri = format!("/cards/{CARD_B}/proposals/incoming");
        let (status, proposal) = call(&app, "POST", &format!("{uri}/phonons"), Some(phonons)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(proposal["Phonons"].as_array().unwrap().len(), 2);
        assert_eq!(proposal["Phonons"][0]["ProposedForTransfer"], true);

        // not validated yet
        let (status, _) = call(&app, "POST", &format!("{uri}/accept"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, "POST", &format!("{uri}/validate"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_status(&app, &uri, "validated").await;

        let (status, _) = call(&app, "POST", &format!("{uri}/accept"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_status(&app, &uri, "transferred").await;

        let (_, phonons) = call(&app, "GET", &format!("/cards/{CARD_B}/listPhonons"), None).await;
        assert_eq!(phonons.as_array().unwrap().len(), 2);

        let (_, proposal) = call(&app, "POST", &format!("{uri}/reset"), None).await;
        assert_eq!(proposal["Status"], "unvalidated");
    }

    async fn wait_for_status(app: &Router, uri: &str, expected: &str) {
        for _ in 0..100 {
            let (_, proposal) = call(app, "GET", uri, None).await;
            if proposal["Status"] == expected {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("proposal never reached {expected}");
    }

    #[tokio::test]
    async fn init_only_once() {
        let state = state();
        let app = build_router(state.clone());
        state.session.device().mark_uninitialized(CARD_B.into());
        let uri = format!("/cards/{CARD_B}/init");

        let (status, _) = call(&app, "POST", &uri, Some(json!({ "pin": "1234" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "POST", &uri, Some(json!({ "pin": "424242" }))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(&app, "POST", &uri, Some(json!({ "pin": "424242" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("already has a PIN"));
    }

    #[tokio::test]
    async fn create_and_redeem() {
        let app = build_router(state());
        let (status, phonon) = call(
            &app,
            "POST",
            &format!("/cards/{CARD_B}/phonon/create"),
            Some(json!({ "currencyType": 2, "denomination": "2000000000000000000" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let address = phonon["Address"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/cards/{CARD_B}/phonon/create"),
            Some(json!({ "currencyType": 2, "denomination": "257" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let redeem = format!("/cards/{CARD_B}/phonon/redeem");
        let (status, _) = call(&app, "POST", &redeem, Some(json!({ "addresses": ["0xp1"] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, keys) = call(&app, "POST", &redeem, Some(json!({ "addresses": [address] }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(keys[0]["Address"], address.as_str());
        assert!(keys[0]["PrivateKey"].is_string());

        let (_, phonons) = call(&app, "GET", &format!("/cards/{CARD_B}/listPhonons"), None).await;
        assert!(phonons.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn mine_cancel_and_report() {
        let app = build_router(state());
        let mine = format!("/cards/{CARD_A}/phonon/mineNative");

        let (status, _) = call(&app, "POST", &format!("{mine}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, "POST", &mine, Some(json!({ "difficulty": 30 }))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let attempt_id = body["attemptId"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "POST", &mine, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, "POST", &format!("{mine}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attemptId"], attempt_id.as_str());

        let report_uri = format!("{mine}/status/{attempt_id}");
        let mut report = Value::Null;
        for _ in 0..100 {
            let (status, body) = call(&app, "GET", &report_uri, None).await;
            assert_eq!(status, StatusCode::OK);
            if body["Status"] != "active" {
                report = body;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(report["Status"], "cancelled");

        let (_, reports) = call(&app, "GET", &format!("{mine}/status"), None).await;
        assert_eq!(reports.as_array().unwrap().len(), 1);
        let (status, _) = call(&app, "GET", &format!("{mine}/status/unknown"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_direction_is_400() {
        let app = build_router(state());
        let (status, _) = call(&app, "GET", &format!("/cards/{CARD_B}/proposals/sideways"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settings_and_history() {
        let app = build_router(state());
        let (status, settings) = call(
            &app,
            "PUT",
            "/settings",
            Some(json!({ "defaultPhononLayout": "list", "defaultMiningDifficulty": 99 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(settings["defaultPhononLayout"], "list");
        assert_eq!(settings["defaultMiningDifficulty"], 30);

        call(&app, "POST", "/genMock", None).await;
        let (_, history) = call(&app, "GET", "/history", None).await;
        assert_eq!(history[0]["type"], "success");

        let (status, _) = call(&app, "DELETE", "/history", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, history) = call(&app, "GET", "/history", None).await;
        assert!(history.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn denomination_check() {
        let app = build_router(state());
        let (status, body) = call(
            &app,
            "POST",
            "/checkDenomination",
            Some(json!({ "denomination": "1000000000000000000", "currencyType": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["base"], 100);
        assert_eq!(body["exponent"], 16);
        assert_eq!(body["display"], "1 ETH");

        let (status, _) = call(
            &app,
            "POST",
            "/checkDenomination",
            Some(json!({ "denomination": "257" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
