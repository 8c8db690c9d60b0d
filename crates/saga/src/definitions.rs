//! Predefined saga definitions for the platform's cross-service writes.

use serde_json::json;

use crate::saga::SagaType;
use crate::step::SagaStep;

/// Service owning user profiles.
pub const USER_SERVICE: &str = "user";
/// Service owning uploaded media.
pub const MEDIA_SERVICE: &str = "media";
/// Service owning the social graph.
pub const FOLLOW_SERVICE: &str = "follow";

pub const STEP_CREATE_AUTH: &str = "create_auth";
pub const STEP_CREATE_USER: &str = "create_user";
pub const STEP_ATTACH_AVATAR: &str = "attach_avatar";
pub const STEP_UPLOAD_MEDIA: &str = "upload_media";
pub const STEP_LINK_MEDIA: &str = "link_media";
pub const STEP_CREATE_FOLLOW: &str = "create_follow";
pub const STEP_INCREMENT_FOLLOWERS: &str = "increment_followers";

/// A saga type together with its ordered steps, ready to hand to the orchestrator.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    pub saga_type: SagaType,
    pub steps: Vec<SagaStep>,
}

/// Registers a new account: local credentials, the remote profile, then an
/// optional avatar.
///
/// The avatar step has no compensation; it is the last step, so nothing
/// after it can fail.
pub fn user_creation(
    auth_id: &str,
    email: &str,
    username: &str,
    avatar_url: Option<&str>,
) -> SagaDefinition {
    let mut steps = vec![
        SagaStep::local(STEP_CREATE_AUTH, "createAuthRecord")
            .with_data(json!({"authId": auth_id, "email": email}))
            .with_compensation("deleteAuthRecord", json!({"authId": auth_id})),
        SagaStep::new(STEP_CREATE_USER, USER_SERVICE, "createUser")
            .with_data(json!({"authId": auth_id, "email": email, "username": username}))
            .with_compensation("deleteUser", json!({"authId": auth_id})),
    ];
    if let Some(url) = avatar_url {
        steps.push(
            SagaStep::new(STEP_ATTACH_AVATAR, MEDIA_SERVICE, "attachAvatar")
                .with_data(json!({"authId": auth_id, "url": url})),
        );
    }

    SagaDefinition {
        saga_type: SagaType::UserCreation,
        steps,
    }
}

/// Stores an upload, then links it to its owner's profile.
pub fn media_upload(user_id: &str, media_id: &str, url: &str) -> SagaDefinition {
    SagaDefinition {
        saga_type: SagaType::MediaUpload,
        steps: vec![
            SagaStep::new(STEP_UPLOAD_MEDIA, MEDIA_SERVICE, "uploadMedia")
                .with_data(json!({"userId": user_id, "mediaId": media_id, "url": url}))
                .with_compensation("deleteMedia", json!({"mediaId": media_id})),
            SagaStep::new(STEP_LINK_MEDIA, USER_SERVICE, "linkMedia")
                .with_data(json!({"userId": user_id, "mediaId": media_id}))
                .with_compensation(
                    "unlinkMedia",
                    json!({"userId": user_id, "mediaId": media_id}),
                ),
        ],
    }
}

/// Creates a follow edge and bumps the followee's counter.
pub fn follow_creation(follower_id: &str, followee_id: &str) -> SagaDefinition {
    SagaDefinition {
        saga_type: SagaType::FollowCreation,
        steps: vec![
            SagaStep::new(STEP_CREATE_FOLLOW, FOLLOW_SERVICE, "createFollow")
                .with_data(json!({"followerId": follower_id, "followeeId": followee_id}))
                .with_compensation(
                    "deleteFollow",
                    json!({"followerId": follower_id, "followeeId": followee_id}),
                ),
            SagaStep::new(STEP_INCREMENT_FOLLOWERS, USER_SERVICE, "incrementFollowers")
                .with_data(json!({"userId": followee_id}))
                .with_compensation("decrementFollowers", json!({"userId": followee_id})),
        ],
    }
}
