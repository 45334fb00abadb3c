use async_trait::async_trait;

/// Checks the password presented on a connection's startup line.
#[async_trait]
pub trait AuthSource: Send + Sync {
    async fn verify(&self, tenant: &str, password: &str) -> bool;
}

/// One shared secret for every tenant.
#[derive(Debug)]
pub struct StaticPasswordAuth {
    password: String,
}

impl StaticPasswordAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for StaticPasswordAuth {
    async fn verify(&self, _tenant: &str, password: &str) -> bool {
        // Compare every byte so timing doesn't leak the matching prefix length.
        let expected = self.password.as_bytes();
        let given = password.as_bytes();
        let mut diff = expected.len() ^ given.len();
        for (i, b) in expected.iter().enumerate() {
            diff |= usize::from(b ^ given.get(i).copied().unwrap_or(0));
        }
        diff == 0
    }
}
