use std::fmt;
use std::net::Ipv4Addr;

/// A general purpose rate limit key.
///
/// Lets strings, integers, user IDs and IP addresses share one
/// [`Rule`](crate::Rule). IP keys render back to dotted form in
/// [`Rule::get_online`](crate::Rule::get_online).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Text(String),
    Int(i64),
    Uint(u64),
    Ip(Ipv4Addr),
    /// Several parts that together identify one caller, e.g. user + route.
    Composite(Vec<Key>),
}

impl Key {
    /// Builds a composite key from its parts.
    pub fn composite<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Key>,
    {
        Key::Composite(parts.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Text(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{n}"),
            Key::Uint(n) => write!(f, "{n}"),
            Key::Ip(ip) => write!(f, "{ip}"),
            Key::Composite(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<Ipv4Addr> for Key {
    fn from(ip: Ipv4Addr) -> Self {
        Key::Ip(ip)
    }
}

macro_rules! key_from_int {
    ($variant:ident, $wide:ty, $($t:ty),+) => {
        $(
            impl From<$t> for Key {
                fn from(n: $t) -> Self {
                    Key::$variant(n as $wide)
                }
            }
        )+
    };
}

key_from_int!(Int, i64, i8, i16, i32, i64);
key_from_int!(Uint, u64, u8, u16, u32, u64, usize);
