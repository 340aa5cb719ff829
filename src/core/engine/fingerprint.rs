use sha2::{Digest, Sha256};

/// Ключ кэша из содержимого операции и набора получателей.
///
/// Порядок и повторы получателей не влияют на результат.
pub fn fingerprint(action: &str, content: &str, recipients: &[String]) -> String {
    let mut sorted: Vec<&str> = recipients.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(action.as_bytes());
    hasher.update([0u8]);
    hasher.update((content.len() as u64).to_le_bytes());
    hasher.update(content.as_bytes());
    for recipient in sorted {
        hasher.update([0u8]);
        hasher.update(recipient.as_bytes());
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn recipient_order_does_not_matter() {
        let a = fingerprint("encrypt", "hello", &keys(&["k1", "k2"]));
        let b = fingerprint("encrypt", "hello", &keys(&["k2", "k1", "k2"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn content_recipients_and_action_all_matter() {
        let base = fingerprint("encrypt", "hello", &keys(&["k1"]));
        assert_ne!(base, fingerprint("encrypt", "hello!", &keys(&["k1"])));
        assert_ne!(base, fingerprint("encrypt", "hello", &keys(&["k2"])));
        assert_ne!(base, fingerprint("encrypt_presence", "hello", &keys(&["k1"])));
    }
}
