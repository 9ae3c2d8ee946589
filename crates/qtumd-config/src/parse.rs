use indexmap::IndexMap;

/// An in-order `key=value` map, as read from the daemon's config file.
///
/// Order is preserved so that rewriting the file (e.g. after generating a
/// random `rpcpassword`) leaves unrelated lines untouched in their original
/// position.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    entries: IndexMap<String, String>,
}

impl ConfigMap {
    pub fn parse(contents: &str) -> Self {
        let mut entries = IndexMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Coerces a value to an integer. Booleans written as `1`/`0` are the
    /// common case for the options this module validates.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// True if the option is present and coerces to a non-zero integer, or
    /// is the literal string `true`.
    pub fn is_truthy(&self, key: &str) -> bool {
        match self.get(key) {
            Some("true") => true,
            Some(v) => v.parse::<i64>().map(|n| n != 0).unwrap_or(false),
            None => false,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Serialize back to `key=value` lines, in insertion order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_blank_lines_and_comments() {
        let map = ConfigMap::parse("# comment\n\ntxindex=1\n  \nserver=1\n");
        assert_eq!(map.get_int("txindex"), Some(1));
        assert_eq!(map.get_int("server"), Some(1));
    }

    #[test]
    fn preserves_order_on_render() {
        let mut map = ConfigMap::parse("server=1\ntxindex=1\n");
        map.set("rpcuser", "abc");
        assert_eq!(map.render(), "server=1\ntxindex=1\nrpcuser=abc\n");
    }
}
