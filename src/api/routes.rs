use axum::{
    Router,
    routing::{delete, get, post, put},
};

use super::AppState;
use super::{admin, api_keys, auth, invitations, members, organization};

/// V1 API routes
///
/// ## Public Routes (no auth required)
/// - POST /auth/verify - Verify session token
/// - POST /auth/api-key/verify - Verify API key
///
/// ## Session (Session Required)
/// - GET  /auth/session - Current session
///
/// ## Organizations (Session Required)
/// - POST /organizations - Create organization
/// - GET  /organizations - List the caller's organizations
/// - GET  /organizations/check-slug?slug= - Slug availability
/// - GET  /organizations/active - Active organization with members and invitations
/// - PUT  /organizations/active - Set or clear the active organization
/// - GET  /organizations/{organization_id} - Organization with members and invitations
/// - PUT  /organizations/{organization_id} - Update name/logo
/// - DELETE /organizations/{organization_id} - Delete organization
/// - GET  /organizations/{organization_id}/members - List members
/// - POST /organizations/{organization_id}/leave - Leave organization
///
/// ## Members (Session Required)
/// - GET  /members/active - Caller's membership in the active organization
/// - POST /members/update-role - Change a member's role
/// - POST /members/remove - Remove a member by id or email
///
/// ## Invitations (Session Required)
/// - POST /invitations - Invite (or resend)
/// - GET  /invitations?organization_id= - Pending invitations of an organization
/// - GET  /invitations/mine - Pending invitations for the caller
/// - GET  /invitations/{invitation_id} - Invitation details
/// - POST /invitations/{invitation_id}/accept
/// - POST /invitations/{invitation_id}/reject
/// - POST /invitations/{invitation_id}/cancel
///
/// ## Admin (Admin Required)
/// - GET  /admin/users - List users
/// - POST /admin/users - Create user
/// - DELETE /admin/users/{user_id} - Remove user
/// - PUT  /admin/users/{user_id}/role - Set role
/// - POST /admin/users/{user_id}/ban - Ban user
/// - POST /admin/users/{user_id}/unban - Unban user
/// - GET  /admin/users/{user_id}/sessions - List sessions
/// - DELETE /admin/users/{user_id}/sessions - Revoke all sessions
/// - POST /admin/users/{user_id}/impersonate - Impersonate user
/// - DELETE /admin/sessions/{session_id} - Revoke one session
/// - POST /admin/stop-impersonating - End impersonation
/// - GET  /admin/organizations - All organizations
///
/// ## API Key Management (Session Required)
/// - POST /api-keys - Create API key
/// - GET  /api-keys - List API keys
/// - DELETE /api-keys/{key_id} - Revoke API key
pub fn v1_routes() -> Router<AppState> {
    Router::new()
        // ========================================
        // Public: Auth verification endpoints
        // ========================================
        .route("/auth/verify", post(auth::verify_session))
        .route("/auth/api-key/verify", post(auth::verify_api_key))
        .route("/auth/session", get(auth::get_session))
        // ========================================
        // Organizations: Session auth
        // ========================================
        .route(
            "/organizations",
            post(organization::create_organization).get(organization::list_organizations),
        )
        .route("/organizations/check-slug", get(organization::check_slug))
        .route(
            "/organizations/active",
            get(organization::get_active_organization)
                .put(organization::set_active_organization),
        )
        .route(
            "/organizations/{organization_id}",
            get(organization::get_organization)
                .put(organization::update_organization)
                .delete(organization::delete_organization),
        )
        .route(
            "/organizations/{organization_id}/members",
            get(members::list_members),
        )
        .route(
            "/organizations/{organization_id}/leave",
            post(organization::leave_organization),
        )
        // ========================================
        // Members: Session auth
        // ========================================
        .route("/members/active", get(members::get_active_member))
        .route("/members/update-role", post(members::update_member_role))
        .route("/members/remove", post(members::remove_member))
        // ========================================
        // Invitations: Session auth
        // ========================================
        .route(
            "/invitations",
            post(invitations::create_invitation).get(invitations::list_invitations),
        )
        .route("/invitations/mine", get(invitations::list_my_invitations))
        .route(
            "/invitations/{invitation_id}",
            get(invitations::get_invitation),
        )
        .route(
            "/invitations/{invitation_id}/accept",
            post(invitations::accept_invitation),
        )
        .route(
            "/invitations/{invitation_id}/reject",
            post(invitations::reject_invitation),
        )
        .route(
            "/invitations/{invitation_id}/cancel",
            post(invitations::cancel_invitation),
        )
        // ========================================
        // Admin: Session auth + admin role
        // ========================================
        .route(
            "/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route("/admin/users/{user_id}", delete(admin::remove_user))
        .route("/admin/users/{user_id}/role", put(admin::set_role))
        .route("/admin/users/{user_id}/ban", post(admin::ban_user))
        .route("/admin/users/{user_id}/unban", post(admin::unban_user))
        .route(
            "/admin/users/{user_id}/sessions",
            get(admin::list_user_sessions).delete(admin::revoke_user_sessions),
        )
        .route(
            "/admin/users/{user_id}/impersonate",
            post(admin::impersonate_user),
        )
        .route(
            "/admin/sessions/{session_id}",
            delete(admin::revoke_session),
        )
        .route(
            "/admin/stop-impersonating",
            post(admin::stop_impersonating),
        )
        .route("/admin/organizations", get(admin::list_organizations))
        // ========================================
        // API Key Management: Session auth
        // ========================================
        .route(
            "/api-keys",
            post(api_keys::create_api_key).get(api_keys::list_api_keys),
        )
        .route("/api-keys/{key_id}", delete(api_keys::revoke_api_key))
}
