use casbin::prelude::DefaultModel;

/// Policy domain under which system-role grants are stored.
pub const SYSTEM_DOMAIN: &str = "system";

// Grants stored under the system domain apply in every tenant where the role
// is assigned; assignments themselves are always tenant-scoped.
const MODEL: &str = r#"
[request_definition]
r = sub, dom, obj, act

[policy_definition]
p = sub, dom, obj, act

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && (r.dom == p.dom || p.dom == "system") && r.obj == p.obj && r.act == p.act
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

/// Parse the embedded model.
///
/// # Errors
/// - Casbin parse errors; the embedded model is covered by tests.
pub async fn casbin_model() -> casbin::Result<DefaultModel> {
    DefaultModel::from_str(MODEL).await
}
