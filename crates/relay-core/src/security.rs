// ============== Authorization ==============

/// Senders allowed to produce inbound messages.
///
/// Entries match a sender id or a username (leading `@` optional). Compound
/// `id|username` entries match on either half. An empty list admits everyone.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    entries: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_allowed(&self, sender_id: &str, username: Option<&str>) -> bool {
        if self.entries.is_empty() {
            return true;
        }

        let username = username
            .map(|u| u.trim_start_matches('@'))
            .filter(|u| !u.is_empty());

        self.entries.iter().any(|entry| {
            entry.split('|').map(str::trim).any(|part| {
                if part.is_empty() {
                    return false;
                }
                if part == sender_id {
                    return true;
                }
                match username {
                    Some(u) => part.trim_start_matches('@').eq_ignore_ascii_case(u),
                    None => false,
                }
            })
        })
    }
}
