//! Persisted field names.

pub const NAME: &str = "name";
pub const SEMANTIC: &str = "semantic";
pub const POLICY_TYPE: &str = "type";
pub const IS_SYSTEM: &str = "isSystem";

pub const IDENTITY_ROLES: &str = "identityRoles";
pub const SERVICE_ROLES: &str = "serviceRoles";
pub const EDGE_ROUTER_ROLES: &str = "edgeRouterRoles";
pub const POSTURE_CHECK_ROLES: &str = "postureCheckRoles";

pub const ROLE_ATTRIBUTES: &str = "roleAttributes";
pub const IDENTITY_TYPE: &str = "identityType";
pub const IS_ADMIN: &str = "isAdmin";
pub const IS_TUNNELER_ENABLED: &str = "isTunnelerEnabled";
pub const ENCRYPTION_REQUIRED: &str = "encryptionRequired";
pub const TYPE_ID: &str = "typeId";

pub const IDENTITY_ID: &str = "identityId";
pub const API_SESSION_ID: &str = "apiSessionId";
pub const SERVICE_ID: &str = "serviceId";
pub const TOKEN: &str = "token";
pub const DATA: &str = "data";
