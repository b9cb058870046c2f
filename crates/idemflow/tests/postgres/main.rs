//! Integration tests against PostgreSQL. Require `TEST_ADMIN_DATABASE_URL`.

mod store;
mod support;
