//! Header fields of a request or response.
//!
//! Names compare case-insensitively. Entries keep their order and a name may
//! repeat, which `Set-Cookie` relies on.

use std::fmt;

/// Ordered, case-insensitive header fields.
///
/// [`append`](Self::append) adds a field next to existing ones of the same
/// name; [`set`](Self::set) replaces them.
///
/// # Examples
///
/// ```
/// use actionroute::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.set("Content-Type", "Application/JSON; charset=utf-8");
/// headers.append("Set-Cookie", "a=1");
/// headers.append("Set-Cookie", "b=2");
///
/// assert_eq!(headers.media_type().as_deref(), Some("application/json"));
/// assert_eq!(headers.get_all("set-cookie").count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Adds a field, keeping earlier fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` with a single one.
    ///
    /// The new field takes the position of the first replaced one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let Some(first) = self.position(&name) else {
            self.fields.push((name, value.into()));
            return;
        };
        let mut index = 0;
        self.fields.retain(|(key, _)| {
            let keep = index <= first || !key.eq_ignore_ascii_case(&name);
            index += 1;
            keep
        });
        self.fields[first] = (name, value.into());
    }

    /// The first value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.fields[index].1.as_str())
    }

    /// Every value of `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Removes every field named `name`; `true` if there was one.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        self.fields.len() < before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// The `Content-Type` without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        let content_type = self.get("content-type")?;
        let media = content_type.split(';').next()?.trim();
        (!media.is_empty()).then(|| media.to_ascii_lowercase())
    }

    /// Number of fields, counting repeated names once per field.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let mut h = Headers::new();
        h.append("X-Request-Id", "abc");
        assert_eq!(h.get("x-request-id"), Some("abc"));
        assert_eq!(h.get("X-REQUEST-ID"), Some("abc"));
        assert!(h.contains("x-Request-id"));
        assert_eq!(h.get("x-missing"), None);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut h = Headers::new();
        h.append("Location", "/a");
        h.append("Set-Cookie", "a=1");
        h.append("location", "/b");
        h.set("Location", "/c");

        let fields: Vec<_> = h.iter().collect();
        assert_eq!(fields, vec![("Location", "/c"), ("Set-Cookie", "a=1")]);
    }

    #[test]
    fn append_keeps_repeated_fields() {
        let mut h = Headers::new();
        h.append("Set-Cookie", "a=1");
        h.append("Set-Cookie", "b=2");
        let values: Vec<_> = h.get_all("set-cookie").collect();
        assert_eq!(values, vec!["a=1", "b=2"]);

        assert!(h.remove("SET-COOKIE"));
        assert!(h.is_empty());
        assert!(!h.remove("set-cookie"));
    }

    #[test]
    fn media_type_drops_parameters() {
        let mut h = Headers::new();
        assert_eq!(h.media_type(), None);
        h.set("content-type", " Text/Plain ; charset=utf-8");
        assert_eq!(h.media_type().as_deref(), Some("text/plain"));
    }
}
