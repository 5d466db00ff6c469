use serde::Deserialize;

use crate::utils::Claims;
use crate::visibility::Observer;

#[derive(Debug, Default, Deserialize)]
pub struct VisibilityQuery {
    pub zoom: Option<f64>,
}

impl VisibilityQuery {
    pub fn observer(&self, claims: &Claims) -> Observer {
        Observer {
            user_id: claims.sub.clone(),
            role: claims.role,
            group_id: claims.group_id.clone(),
            zoom: self.zoom,
        }
    }
}
