// src/services/api_server.rs
//! HTTP API for the VerifyMe portals.
//!
//! Routes are grouped by portal. Everything under `/candidate`,
//! `/recruiter`, `/issuer` and `/admin` requires a bearer token for that
//! role (see [`auth`](crate::services::auth)); `/auth/login`, `/u/:id`,
//! `/issuers` and `/health` are public. Every response body is JSON and
//! errors use the shape produced by [`ServiceError`].

use crate::blockchain::chain_client::ChainClient;
use crate::config::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::models::access::{AccessRequest, AccessStatus};
use crate::models::audit::{AuditFilter, AuditLogEntry, AuditView};
use crate::models::credential::{
    CredentialFilter, CredentialRecord, IssuanceRequest, IssueCredentialPayload, RevocationEntry,
};
use crate::models::deposit::{DepositEntry, DepositRequest};
use crate::models::issuer::{
    DnsChallenge, Issuer, IssuerDirectoryEntry, IssuerType, TrustSettings, TrustSettingsUpdate,
};
use crate::models::submission::{ComplianceFile, FileRef, Submission, SubmissionFilter};
use crate::services::admin_review::{AdminReview, ApprovalOutcome};
use crate::services::auth::{require_role, AuthService, LoginRequest, LoginResponse, Role, RoleGuard, SessionUser};
use crate::services::candidate::{
    CandidateProfile, CandidateService, ExternalCredentialPayload, IdChecker, RecentCandidate,
};
use crate::services::credential_issuer::{CredentialDetail, CredentialIssuer, IssuerOverview};
use crate::services::deposit_ledger::DepositLedger;
use crate::services::verifier::{DnsCheck, IssuerVerifier, VerifiedIssuer};
use crate::storage::kv_store::JsonStore;
use crate::storage::repository::Repository;
use crate::wallet::balance::BalanceStore;
use axum::{
    extract::{Json, Path, Query, State},
    middleware,
    routing::{get, post, put},
    Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// API request and response structures

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuerRef {
    issuer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimRequest {
    cccd_hash: String,
}

#[derive(Deserialize)]
struct AccessStatusUpdate {
    status: AccessStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuanceRequestBody {
    issuer_id: String,
    #[serde(rename = "type")]
    credential_type: String,
    #[serde(default)]
    level: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessRequestBody {
    candidate_id: String,
    record_id: String,
    duration: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecruiterVerificationBody {
    org_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterIssuerBody {
    org_name: String,
    issuer_type: IssuerType,
}

#[derive(Deserialize)]
struct DomainBody {
    domain: String,
}

#[derive(Deserialize)]
struct FilesBody {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Deserialize)]
struct ReasonBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    note: String,
}

#[derive(Deserialize)]
struct VerifiedBody {
    verified: bool,
}

#[derive(Deserialize)]
struct ComplianceFileBody {
    name: String,
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditTargetQuery {
    target_id: Option<String>,
}

#[derive(Serialize)]
struct BalanceResponse {
    address: String,
    balance: u64,
}

/// Shared state behind every handler.
pub struct ApiServer {
    auth: Arc<AuthService>,
    balances: Arc<BalanceStore>,
    deposits: Arc<DepositLedger>,
    verifier: Arc<IssuerVerifier>,
    issuer: CredentialIssuer,
    review: AdminReview,
    candidates: CandidateService,
}

impl ApiServer {
    /// Wires the services over one repository, store and chain client and
    /// restores the persisted issuer directory.
    pub async fn build(
        settings: &Settings,
        repo: Arc<Repository>,
        chain: ChainClient,
        store: JsonStore,
        id_checker: Arc<dyn IdChecker>,
    ) -> ServiceResult<Self> {
        let balances = Arc::new(BalanceStore::new(store.clone(), settings.default_balance));
        let deposits = Arc::new(DepositLedger::new(store.clone(), balances.clone(), settings.deposit_amount));
        let verifier = Arc::new(IssuerVerifier::new(
            repo.clone(),
            chain.clone(),
            store,
            deposits.clone(),
        ));
        let restored = verifier.restore_directory().await?;
        info!("restored {} issuer directory entries", restored);

        Ok(Self {
            auth: Arc::new(AuthService::new(
                &settings.jwt_secret,
                &settings.admin_passphrase,
                settings.session_ttl_hours,
            )),
            issuer: CredentialIssuer::new(repo.clone(), chain.clone()),
            review: AdminReview::new(repo.clone(), verifier.clone(), deposits.clone()),
            candidates: CandidateService::new(repo, deposits.clone(), chain, id_checker),
            balances,
            deposits,
            verifier,
        })
    }

    fn guard(&self, role: Role) -> RoleGuard {
        RoleGuard {
            auth: self.auth.clone(),
            role,
        }
    }

    /// Builds the full router with CORS enabled.
    pub fn router(self: &Arc<Self>) -> Router {
        let candidate = Router::new()
            .route("/candidate/credentials", get(Self::candidate_credentials_handler))
            .route("/candidate/credentials/external", post(Self::add_external_credential_handler))
            .route("/candidate/credentials/:record_id/id-check", post(Self::id_check_handler))
            .route("/candidate/credentials/:record_id/claim", post(Self::claim_handler))
            .route("/candidate/balance", get(Self::balance_handler))
            .route("/candidate/deposits/prepare", post(Self::prepare_deposit_handler))
            .route("/candidate/deposits/pay", post(Self::pay_deposit_handler))
            .route("/candidate/access-requests", get(Self::candidate_access_requests_handler))
            .route("/candidate/access-requests/:id", post(Self::update_access_handler))
            .route("/candidate/issuance-requests", post(Self::request_issuance_handler))
            .route_layer(middleware::from_fn_with_state(self.guard(Role::Candidate), require_role));

        let recruiter = Router::new()
            .route("/recruiter/search", get(Self::search_handler))
            .route("/recruiter/candidates/recent", get(Self::recent_candidates_handler))
            .route(
                "/recruiter/candidates/:candidate_id/credentials",
                get(Self::candidate_credentials_for_viewer_handler),
            )
            .route("/recruiter/access-requests", post(Self::request_access_handler))
            .route("/recruiter/verification", post(Self::recruiter_verification_handler))
            .route_layer(middleware::from_fn_with_state(self.guard(Role::Recruiter), require_role));

        let issuer = Router::new()
            .route("/issuer/register", post(Self::register_issuer_handler))
            .route("/issuer/profile", get(Self::issuer_profile_handler))
            .route("/issuer/overview", get(Self::overview_handler))
            .route("/issuer/dns/start", post(Self::start_dns_handler))
            .route("/issuer/dns/check", post(Self::check_dns_handler))
            .route("/issuer/legal", post(Self::submit_legal_handler))
            .route("/issuer/trust", get(Self::trust_settings_handler).put(Self::update_trust_settings_handler))
            .route(
                "/issuer/credentials",
                get(Self::issued_credentials_handler).post(Self::issue_credential_handler),
            )
            .route("/issuer/credentials/:record_id", get(Self::credential_detail_handler))
            .route("/issuer/credentials/:record_id/revoke", post(Self::revoke_handler))
            .route("/issuer/revocations", get(Self::issuer_revocations_handler))
            .route("/issuer/requests", get(Self::issuance_requests_handler))
            .route("/issuer/requests/:request_id/approve", post(Self::approve_request_handler))
            .route("/issuer/requests/:request_id/reject", post(Self::reject_request_handler))
            .route("/issuer/audit-logs", get(Self::issuer_audit_handler))
            .route(
                "/issuer/compliance-files",
                get(Self::compliance_files_handler).post(Self::upload_compliance_file_handler),
            );
        #[cfg(feature = "demo")]
        let issuer = issuer.route("/issuer/legal/demo-approve", post(Self::demo_approve_handler));
        let issuer = issuer.route_layer(middleware::from_fn_with_state(self.guard(Role::Issuer), require_role));

        let admin = Router::new()
            .route("/admin/submissions", get(Self::submissions_handler))
            .route("/admin/submissions/:id", get(Self::submission_handler))
            .route("/admin/submissions/:id/approve", post(Self::approve_submission_handler))
            .route("/admin/submissions/:id/reject", post(Self::reject_submission_handler))
            .route("/admin/submissions/:id/request-update", post(Self::request_update_handler))
            .route("/admin/audit-logs", get(Self::admin_audit_handler))
            .route("/admin/issuers/:id/verified", post(Self::set_verified_handler))
            .route("/admin/issuers/:id/verify-and-refund", post(Self::verify_and_refund_handler))
            .route("/admin/deposits", get(Self::deposits_handler))
            .route("/admin/credentials", get(Self::all_credentials_handler))
            .route("/admin/revocations", get(Self::all_revocations_handler))
            .route_layer(middleware::from_fn_with_state(self.guard(Role::Admin), require_role));

        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/health", get(|| async { Json(serde_json::json!({ "status": "ok" })) }))
            .route("/auth/login", post(Self::login_handler))
            .route("/u/:candidate_id", get(Self::public_profile_handler))
            .route("/issuers", get(Self::directory_handler))
            .route("/issuers/:issuer_id/trust", get(Self::public_trust_handler))
            .merge(candidate)
            .merge(recruiter)
            .merge(issuer)
            .merge(admin)
            .layer(cors)
            .with_state(self.clone())
    }

    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let app = Arc::new(self).router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);
        axum::serve(listener, app).await
    }

    // =====================
    // Public Handlers
    // =====================

    /// Starts a session.
    ///
    /// # Endpoint
    /// POST /auth/login
    ///
    /// # Responses
    /// - 200 OK: token and session user
    /// - 401 Unauthorized: wrong admin passphrase
    /// - 422 Unprocessable Entity: malformed address
    async fn login_handler(
        State(state): State<Arc<ApiServer>>,
        Json(payload): Json<LoginRequest>,
    ) -> ServiceResult<Json<LoginResponse>> {
        state.auth.login(payload).map(Json)
    }

    /// Public profile: live public credentials only.
    ///
    /// # Endpoint
    /// GET /u/:candidate_id
    async fn public_profile_handler(
        State(state): State<Arc<ApiServer>>,
        Path(candidate_id): Path<String>,
    ) -> ServiceResult<Json<CandidateProfile>> {
        state.candidates.search_candidate(&candidate_id, None).await.map(Json)
    }

    /// # Endpoint
    /// GET /issuers
    async fn directory_handler(State(state): State<Arc<ApiServer>>) -> Json<Vec<IssuerDirectoryEntry>> {
        Json(state.verifier.list_issuers().await)
    }

    /// Public trust page of an issuer.
    ///
    /// # Endpoint
    /// GET /issuers/:issuer_id/trust
    ///
    /// # Responses
    /// - 200 OK: the published settings
    /// - 404 Not Found: unknown issuer or page not public
    async fn public_trust_handler(
        State(state): State<Arc<ApiServer>>,
        Path(issuer_id): Path<String>,
    ) -> ServiceResult<Json<TrustSettings>> {
        state.verifier.public_trust_settings(&issuer_id).await.map(Json)
    }

    // =====================
    // Candidate Handlers
    // =====================

    async fn candidate_credentials_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Vec<CredentialRecord>>> {
        state.candidates.get_credentials(&user.id).await.map(Json)
    }

    /// Uploads an external credential for the signed-in candidate.
    ///
    /// # Endpoint
    /// POST /candidate/credentials/external
    ///
    /// # Request Body
    /// Issuer id and certificate details; `candidateId` is taken from the session.
    async fn add_external_credential_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(mut payload): Json<ExternalCredentialPayload>,
    ) -> ServiceResult<Json<CredentialRecord>> {
        payload.candidate_id = user.id;
        state.candidates.add_external_credential(payload).await.map(Json)
    }

    async fn id_check_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(record_id): Path<String>,
    ) -> ServiceResult<Json<CredentialRecord>> {
        state.candidates.run_id_check(&user.id, &record_id).await.map(Json)
    }

    async fn claim_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(record_id): Path<String>,
        Json(payload): Json<ClaimRequest>,
    ) -> ServiceResult<Json<CredentialRecord>> {
        state
            .candidates
            .claim_credential_by_cccd(&record_id, &user.id, &payload.cccd_hash)
            .await
            .map(Json)
    }

    async fn balance_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<BalanceResponse>> {
        let balance = state.balances.balance(&user.id).await?;
        Ok(Json(BalanceResponse {
            address: user.id,
            balance,
        }))
    }

    async fn prepare_deposit_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<IssuerRef>,
    ) -> ServiceResult<Json<Option<DepositEntry>>> {
        state
            .candidates
            .prepare_external_deposit(&user.id, &payload.issuer_id)
            .await
            .map(Json)
    }

    /// Pays a deposit from the signed-in candidate's balance.
    ///
    /// # Endpoint
    /// POST /candidate/deposits/pay
    ///
    /// # Responses
    /// - 200 OK: the PAID ledger entry
    /// - 409 Conflict: already paid, or insufficient balance
    async fn pay_deposit_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(mut payload): Json<DepositRequest>,
    ) -> ServiceResult<Json<DepositEntry>> {
        payload.candidate_address = user.id;
        state.candidates.pay_deposit(payload).await.map(Json)
    }

    async fn candidate_access_requests_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Vec<AccessRequest>>> {
        state.candidates.list_access_requests(&user.id).await.map(Json)
    }

    async fn update_access_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(id): Path<String>,
        Json(payload): Json<AccessStatusUpdate>,
    ) -> ServiceResult<Json<AccessRequest>> {
        state
            .candidates
            .update_access_status(&user.id, &id, payload.status)
            .await
            .map(Json)
    }

    async fn request_issuance_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<IssuanceRequestBody>,
    ) -> ServiceResult<Json<IssuanceRequest>> {
        state
            .issuer
            .create_issuance_request(&payload.issuer_id, &user.id, &payload.credential_type, &payload.level)
            .await
            .map(Json)
    }

    // =====================
    // Recruiter Handlers
    // =====================

    async fn search_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Query(query): Query<SearchQuery>,
    ) -> ServiceResult<Json<CandidateProfile>> {
        state
            .candidates
            .search_candidate(&query.q, Some(&user.id))
            .await
            .map(Json)
    }

    async fn recent_candidates_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Vec<RecentCandidate>>> {
        state.candidates.recent_candidates(&user.id).await.map(Json)
    }

    /// Credentials of a candidate that the signed-in recruiter may see.
    ///
    /// # Endpoint
    /// GET /recruiter/candidates/:candidate_id/credentials
    async fn candidate_credentials_for_viewer_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(candidate_id): Path<String>,
    ) -> ServiceResult<Json<Vec<CredentialRecord>>> {
        state
            .candidates
            .get_candidate_credentials(&candidate_id, &user.id)
            .await
            .map(Json)
    }

    async fn request_access_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<AccessRequestBody>,
    ) -> ServiceResult<Json<AccessRequest>> {
        state
            .candidates
            .request_access(&user.id, &user.name, &payload.candidate_id, &payload.record_id, &payload.duration)
            .await
            .map(Json)
    }

    async fn recruiter_verification_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<RecruiterVerificationBody>,
    ) -> ServiceResult<Json<Submission>> {
        state
            .review
            .submit_recruiter_verification(&user.id, &payload.org_name, &payload.email, payload.files)
            .await
            .map(Json)
    }

    // =====================
    // Issuer Handlers
    // =====================

    async fn register_issuer_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<RegisterIssuerBody>,
    ) -> ServiceResult<Json<Issuer>> {
        state
            .verifier
            .register_issuer(&user.id, &payload.org_name, payload.issuer_type)
            .await
            .map(Json)
    }

    async fn issuer_profile_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Issuer>> {
        state.verifier.get_issuer_profile(&user.id).await.map(Json)
    }

    async fn overview_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<IssuerOverview>> {
        state.issuer.overview(&user.id).await.map(Json)
    }

    /// Returns the TXT record the issuer must publish.
    ///
    /// # Endpoint
    /// POST /issuer/dns/start
    async fn start_dns_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<DomainBody>,
    ) -> ServiceResult<Json<DnsChallenge>> {
        state.verifier.start_dns_setup(&user.id, &payload.domain).await.map(Json)
    }

    async fn check_dns_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<DomainBody>,
    ) -> ServiceResult<Json<DnsCheck>> {
        state.verifier.check_dns(&user.id, &payload.domain).await.map(Json)
    }

    async fn submit_legal_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<FilesBody>,
    ) -> ServiceResult<Json<Issuer>> {
        state.verifier.submit_legal_docs(&user.id, payload.files).await.map(Json)
    }

    async fn trust_settings_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<TrustSettings>> {
        state.verifier.get_trust_settings(&user.id).await.map(Json)
    }

    /// Merges the given fields into the issuer's trust page settings.
    ///
    /// # Endpoint
    /// PUT /issuer/trust
    ///
    /// # Responses
    /// - 200 OK: the saved settings
    /// - 422 Unprocessable Entity: empty organisation name or bad website
    async fn update_trust_settings_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<TrustSettingsUpdate>,
    ) -> ServiceResult<Json<TrustSettings>> {
        state.verifier.update_trust_settings(&user.id, payload).await.map(Json)
    }

    #[cfg(feature = "demo")]
    async fn demo_approve_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Issuer>> {
        state.verifier.approve_legal_demo(&user.id).await.map(Json)
    }

    async fn issued_credentials_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Query(filter): Query<CredentialFilter>,
    ) -> Json<Vec<CredentialRecord>> {
        Json(state.issuer.list_issued_credentials(Some(&user.id), &filter).await)
    }

    /// Issues a credential as the signed-in issuer.
    ///
    /// # Endpoint
    /// POST /issuer/credentials
    ///
    /// # Responses
    /// - 200 OK: the stored record
    /// - 409 Conflict: issuer not eligible to issue yet
    /// - 502 Bad Gateway: chain rejected a co-op issuance
    async fn issue_credential_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<IssueCredentialPayload>,
    ) -> ServiceResult<Json<CredentialRecord>> {
        state.issuer.issue_credential(&user.id, payload).await.map(Json)
    }

    async fn own_credential(&self, user: &SessionUser, record_id: &str) -> ServiceResult<CredentialDetail> {
        let detail = self.issuer.get_credential_detail(record_id).await?;
        if !detail.record.issuer_id.eq_ignore_ascii_case(&user.id) {
            return Err(ServiceError::not_found("credential", record_id));
        }
        Ok(detail)
    }

    async fn credential_detail_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(record_id): Path<String>,
    ) -> ServiceResult<Json<CredentialDetail>> {
        state.own_credential(&user, &record_id).await.map(Json)
    }

    async fn revoke_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(record_id): Path<String>,
        Json(payload): Json<ReasonBody>,
    ) -> ServiceResult<Json<CredentialRecord>> {
        state.own_credential(&user, &record_id).await?;
        state
            .issuer
            .revoke_credential(&record_id, &payload.reason, &user.name)
            .await
            .map(Json)
    }

    async fn issuer_revocations_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> Json<Vec<RevocationEntry>> {
        Json(state.issuer.get_revocation_history(Some(&user.id)).await)
    }

    async fn issuance_requests_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Vec<IssuanceRequest>>> {
        state.issuer.list_requests(&user.id).await.map(Json)
    }

    async fn approve_request_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(request_id): Path<String>,
    ) -> ServiceResult<Json<CredentialRecord>> {
        state.issuer.approve_request(&user.id, &request_id).await.map(Json)
    }

    async fn reject_request_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Path(request_id): Path<String>,
        Json(payload): Json<ReasonBody>,
    ) -> ServiceResult<Json<IssuanceRequest>> {
        state
            .issuer
            .reject_request(&user.id, &request_id, &payload.reason)
            .await
            .map(Json)
    }

    async fn issuer_audit_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Query(filter): Query<AuditFilter>,
    ) -> Json<Vec<AuditView>> {
        Json(state.issuer.get_audit_logs(Some(&user.id), &filter).await)
    }

    async fn compliance_files_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
    ) -> ServiceResult<Json<Vec<ComplianceFile>>> {
        state.verifier.list_compliance_files(&user.id).await.map(Json)
    }

    async fn upload_compliance_file_handler(
        State(state): State<Arc<ApiServer>>,
        user: SessionUser,
        Json(payload): Json<ComplianceFileBody>,
    ) -> ServiceResult<Json<ComplianceFile>> {
        state
            .verifier
            .upload_compliance_file(&user.id, &payload.name, &payload.url)
            .await
            .map(Json)
    }

    // =====================
    // Admin Handlers
    // =====================

    async fn submissions_handler(
        State(state): State<Arc<ApiServer>>,
        Query(filter): Query<SubmissionFilter>,
    ) -> Json<Vec<Submission>> {
        Json(state.review.list_submissions(&filter).await)
    }

    async fn submission_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> ServiceResult<Json<Submission>> {
        state.review.get_submission(&id).await.map(Json)
    }

    /// Approves a submission; for issuers this also refunds their deposits.
    ///
    /// # Endpoint
    /// POST /admin/submissions/:id/approve
    ///
    /// # Responses
    /// - 200 OK: approved submission with refund summary
    /// - 409 Conflict: submission not PENDING
    /// - 502 Bad Gateway: refund failed and the approval was rolled back
    async fn approve_submission_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> ServiceResult<Json<ApprovalOutcome>> {
        state.review.approve_submission(&id).await.map(Json)
    }

    async fn reject_submission_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        Json(payload): Json<ReasonBody>,
    ) -> ServiceResult<Json<Submission>> {
        state
            .review
            .reject_submission(&id, &payload.reason, &payload.note)
            .await
            .map(Json)
    }

    async fn request_update_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        Json(payload): Json<ReasonBody>,
    ) -> ServiceResult<Json<Submission>> {
        state.review.request_update(&id, &payload.note).await.map(Json)
    }

    async fn admin_audit_handler(
        State(state): State<Arc<ApiServer>>,
        Query(query): Query<AuditTargetQuery>,
    ) -> Json<Vec<AuditLogEntry>> {
        Json(state.review.list_admin_audit_logs(query.target_id.as_deref()).await)
    }

    async fn set_verified_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
        Json(payload): Json<VerifiedBody>,
    ) -> ServiceResult<Json<IssuerDirectoryEntry>> {
        state.verifier.set_issuer_verified(&id, payload.verified).await.map(Json)
    }

    async fn verify_and_refund_handler(
        State(state): State<Arc<ApiServer>>,
        Path(id): Path<String>,
    ) -> ServiceResult<Json<VerifiedIssuer>> {
        state.verifier.verify_issuer_and_refund(&id).await.map(Json)
    }

    async fn deposits_handler(State(state): State<Arc<ApiServer>>) -> ServiceResult<Json<Vec<DepositEntry>>> {
        state.deposits.list().await.map(Json)
    }

    async fn all_credentials_handler(
        State(state): State<Arc<ApiServer>>,
        Query(filter): Query<CredentialFilter>,
    ) -> Json<Vec<CredentialRecord>> {
        Json(state.issuer.list_issued_credentials(None, &filter).await)
    }

    async fn all_revocations_handler(State(state): State<Arc<ApiServer>>) -> Json<Vec<RevocationEntry>> {
        Json(state.issuer.get_revocation_history(None).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::chain_client::RecordingChainGateway;
    use crate::contracts::registry_calls::RegistryCalls;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const ATLAS: &str = "0xabc123abc123abc123abc123abc123abc123abc123abc123abc123abc12323ab";
    const GROWTH: &str = "0x3103103103103103103103103103103103103103103103103103103103103103";
    const CANDIDATE: &str = "0x91ab23cc98ddee11223344556677889900aabbccddeeff001122334455667788";

    struct AlwaysMatches;

    #[async_trait::async_trait]
    impl IdChecker for AlwaysMatches {
        async fn check(&self, _cert_id: &str) -> ServiceResult<bool> {
            Ok(true)
        }
    }

    async fn test_app() -> Router {
        let settings = Settings::default();
        let repo = Arc::new(Repository::new());
        repo.seed_demo().await;
        let chain = ChainClient::new(
            RegistryCalls::new("0xpkg", "0xreg"),
            Arc::new(RecordingChainGateway::new()),
        );
        let server = ApiServer::build(&settings, repo, chain, JsonStore::in_memory(), Arc::new(AlwaysMatches))
            .await
            .unwrap();
        Arc::new(server).router()
    }

    async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn login(app: &Router, body: Value) -> String {
        let (status, value) = send(app, "POST", "/auth/login", None, Some(body)).await;
        assert_eq!(status, StatusCode::OK, "{}", value);
        value["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_role_routes_require_matching_token() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/candidate/credentials", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "unauthorized");

        let candidate = login(&app, json!({ "role": "candidate", "address": CANDIDATE })).await;
        let (status, _) = send(&app, "GET", "/candidate/credentials", Some(&candidate), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/admin/submissions", Some(&candidate), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "role": "admin", "passphrase": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_external_credential_and_deposit_over_http() {
        let app = test_app().await;
        let token = login(&app, json!({ "role": "candidate", "address": CANDIDATE })).await;

        let (status, record) = send(
            &app,
            "POST",
            "/candidate/credentials/external",
            Some(&token),
            Some(json!({ "issuerId": GROWTH, "walletAddress": CANDIDATE, "certId": "GC-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", record);
        assert_eq!(record["status"], "pending");
        assert_eq!(record["depositStatus"], "REQUIRED");
        assert_eq!(record["depositAmount"], 5);

        let (status, paid) = send(
            &app,
            "POST",
            "/candidate/deposits/pay",
            Some(&token),
            Some(json!({ "depositId": record["depositId"], "issuerId": GROWTH })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", paid);
        assert_eq!(paid["status"], "PAID");

        let (_, balance) = send(&app, "GET", "/candidate/balance", Some(&token), None).await;
        assert_eq!(balance["balance"], 5);

        let (status, _) = send(
            &app,
            "POST",
            "/candidate/deposits/pay",
            Some(&token),
            Some(json!({ "depositId": record["depositId"], "issuerId": GROWTH })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, vault) = send(&app, "GET", "/candidate/credentials", Some(&token), None).await;
        assert_eq!(vault[0]["depositStatus"], "PAID");
    }

    #[tokio::test]
    async fn test_issuer_legal_review_over_http() {
        let app = test_app().await;
        let issuer = login(&app, json!({ "role": "issuer", "address": ATLAS })).await;
        let admin = login(&app, json!({ "role": "admin", "passphrase": "verifyme-admin" })).await;

        let (status, profile) = send(&app, "POST", "/issuer/legal", Some(&issuer), Some(json!({ "files": [] }))).await;
        assert_eq!(status, StatusCode::OK, "{}", profile);
        let submission_id = profile["lastSubmissionId"].as_str().unwrap().to_string();

        let (status, outcome) = send(
            &app,
            "POST",
            &format!("/admin/submissions/{}/approve", submission_id),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", outcome);
        assert_eq!(outcome["status"], "APPROVED");

        let (_, profile) = send(&app, "GET", "/issuer/profile", Some(&issuer), None).await;
        assert_eq!(profile["verificationLevel"], 2);

        let (_, directory) = send(&app, "GET", "/issuers", None, None).await;
        let atlas = directory
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["id"] == ATLAS)
            .unwrap();
        assert_eq!(atlas["verified"], true);

        let (status, _) = send(
            &app,
            "POST",
            "/issuer/credentials",
            Some(&issuer),
            Some(json!({ "candidateId": CANDIDATE, "type": "Degree", "level": "Bachelor" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_public_profile_validates_id() {
        let app = test_app().await;
        let (status, body) = send(&app, "GET", "/u/not-an-id", None, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["kind"], "validation");

        let (status, body) = send(&app, "GET", &format!("/u/{}", CANDIDATE), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], CANDIDATE);
    }

    #[tokio::test]
    async fn test_trust_page_over_http() {
        let app = test_app().await;
        let (status, page) = send(&app, "GET", &format!("/issuers/{}/trust", ATLAS), None, None).await;
        assert_eq!(status, StatusCode::OK, "{}", page);
        assert_eq!(page["workingHours"], "Mon-Fri, 9:00 - 18:00");

        let (status, _) = send(&app, "GET", &format!("/issuers/{}/trust", GROWTH), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let growth = login(&app, json!({ "role": "issuer", "address": GROWTH })).await;
        let (status, body) = send(
            &app,
            "PUT",
            "/issuer/trust",
            Some(&growth),
            Some(json!({ "website": "ftp://growth.test" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);
        let (status, saved) = send(
            &app,
            "PUT",
            "/issuer/trust",
            Some(&growth),
            Some(json!({ "sla": "48h", "public": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", saved);
        assert_eq!(saved["orgName"], "GrowthCert");

        let (status, page) = send(&app, "GET", &format!("/issuers/{}/trust", GROWTH), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["sla"], "48h");
    }

    #[tokio::test]
    async fn test_recruiter_candidate_views_over_http() {
        let app = test_app().await;
        let recruiter = login(&app, json!({ "role": "recruiter", "address": "recruiter-01" })).await;
        let (status, recent) = send(&app, "GET", "/recruiter/candidates/recent", Some(&recruiter), None).await;
        assert_eq!(status, StatusCode::OK, "{}", recent);
        assert!(recent.is_array());

        let (status, credentials) = send(
            &app,
            "GET",
            &format!("/recruiter/candidates/{}/credentials", CANDIDATE),
            Some(&recruiter),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", credentials);
        assert!(credentials.is_array());

        let (status, _) = send(&app, "GET", "/recruiter/candidates/0xzz/credentials", Some(&recruiter), None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_pay_uses_session_candidate_and_ledger_amount() {
        let app = test_app().await;
        let owner = login(&app, json!({ "role": "candidate", "address": CANDIDATE })).await;
        let (_, prepared) = send(
            &app,
            "POST",
            "/candidate/deposits/prepare",
            Some(&owner),
            Some(json!({ "issuerId": GROWTH })),
        )
        .await;

        let other = "0x0000000000000000000000000000000000000000000000000000000000000042";
        let intruder = login(&app, json!({ "role": "candidate", "address": other })).await;
        let (status, _) = send(
            &app,
            "POST",
            "/candidate/deposits/pay",
            Some(&intruder),
            Some(json!({ "depositId": prepared["id"], "candidateAddress": CANDIDATE, "amount": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, paid) = send(
            &app,
            "POST",
            "/candidate/deposits/pay",
            Some(&owner),
            Some(json!({ "depositId": prepared["id"], "amount": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", paid);
        assert_eq!(paid["amount"], 5);
        let (_, balance) = send(&app, "GET", "/candidate/balance", Some(&owner), None).await;
        assert_eq!(balance["balance"], 5);
    }
}
