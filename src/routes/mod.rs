pub mod auth;
pub mod health;
pub mod project_permissions;
pub mod projects;
pub mod reporting;
pub mod roles;
pub mod users;
