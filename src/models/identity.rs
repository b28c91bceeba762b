use serde::{Deserialize, Serialize};

/// Role of an authenticated user in a consultation.
///
/// Doctors initiate calls, patients answer them; observers can join a
/// room but take no part in call negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Doctor,
    Patient,
    Observer,
}

impl Role {
    /// Only doctors may open call negotiation.
    pub fn is_initiator(self) -> bool {
        matches!(self, Role::Doctor)
    }

    /// Only patients may accept an offered call.
    pub fn is_responder(self) -> bool {
        matches!(self, Role::Patient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
            Role::Observer => "observer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified identity attached to a connection after authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub display_name: String,
}

/// JWT claims issued by the external identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub role: Role,
    pub display: String,
    pub iat: i64,
    pub exp: i64,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            id: claims.sub,
            role: claims.role,
            display_name: claims.display,
        }
    }
}
