use std::collections::HashSet;

/// E-mail addresses permitted to control the device. Comparison ignores case.
/// An empty list admits nobody.
#[derive(Debug, Clone, Default)]
pub struct EmailAllowList {
    emails: HashSet<String>,
}

impl EmailAllowList {
    pub fn parse(raw: &str) -> Self {
        let emails = raw
            .split(',')
            .map(|email| email.trim().to_ascii_lowercase())
            .filter(|email| !email.is_empty())
            .collect();
        Self { emails }
    }

    pub fn is_allowed(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }
}
