//! Scripted registration service.

use std::sync::Mutex;

use mqfleet::{Error, Registrar, Registration, Result};

/// Issues `client-<device id>` credentials and remembers every device id.
/// The `fail_at`-th call (zero-based) is rejected with `code`.
#[derive(Debug, Default)]
pub struct ScriptedRegistrar {
    calls: Mutex<Vec<String>>,
    fail_at: Option<(usize, i64)>,
}

impl ScriptedRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(call: usize, code: i64) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_at: Some((call, code)),
        }
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Registrar for ScriptedRegistrar {
    async fn register(&self, device_id: &str) -> Result<Registration> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(device_id.to_string());
            calls.len() - 1
        };

        if let Some((at, code)) = self.fail_at {
            if call == at {
                return Err(Error::RegistrationRejected { code });
            }
        }

        Ok(Registration {
            client_id: format!("client-{}", device_id),
            username: format!("user-{}", device_id),
            password: "secret".to_string(),
        })
    }
}
