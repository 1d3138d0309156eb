/// A row of the endpoint access table: which role an endpoint requires.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EndpointAccessDBResponse {
    pub endpoint: String,
    pub is_admin: bool,
}
