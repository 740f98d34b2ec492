//! Which Lua globals and library members count as dangerous capabilities.

use toolgate_domain::RiskFlag;

/// Globals whose values the structural pass follows through aliases.
const TRACKED_ROOTS: &[&str] = &[
    "os",
    "io",
    "debug",
    "package",
    "string",
    "require",
    "load",
    "loadstring",
    "loadfile",
    "dofile",
    "getmetatable",
    "setmetatable",
    "rawget",
    "rawset",
    "rawequal",
    "rawlen",
    "getfenv",
    "setfenv",
    "_G",
    "_ENV",
];

pub(crate) fn is_tracked_root(name: &str) -> bool {
    TRACKED_ROOTS.contains(&name)
}

/// The environment tables: indexing them reaches any global.
pub(crate) fn is_environment(name: &str) -> bool {
    name == "_G" || name == "_ENV"
}

/// Module tables whose members must not be reachable through computed keys.
pub(crate) fn is_sensitive_module(name: &str) -> bool {
    matches!(name, "os" | "io" | "debug" | "package" | "string") || is_environment(name)
}

/// Category of a whole module table escaping into an untracked position.
pub(crate) fn module_escape_flag(name: &str) -> Option<RiskFlag> {
    match name {
        "os" => Some(RiskFlag::ProcessSpawn),
        "io" => Some(RiskFlag::FilesystemEscape),
        "debug" => Some(RiskFlag::Reflection),
        "package" => Some(RiskFlag::DynamicImport),
        "string" => Some(RiskFlag::Serialization),
        _ => None,
    }
}

/// Flag for a resolved global path such as `["os", "execute"]`.
pub(crate) fn classify(path: &[String]) -> Option<RiskFlag> {
    let root = path.first()?.as_str();
    let member = path.get(1).map(String::as_str);
    let flag = match (root, member) {
        ("os", Some("execute" | "exit")) | ("io", Some("popen")) => RiskFlag::ProcessSpawn,
        ("load" | "loadstring" | "loadfile" | "dofile", _) => RiskFlag::DynamicEval,
        ("debug", Some(_))
        | (
            "getmetatable" | "setmetatable" | "rawget" | "rawset" | "rawequal" | "rawlen"
            | "getfenv" | "setfenv" | "_G" | "_ENV",
            _,
        ) => RiskFlag::Reflection,
        ("require", _) | ("package", Some(_)) => RiskFlag::DynamicImport,
        ("io", Some("open" | "lines" | "input" | "output" | "tmpfile"))
        | ("os", Some("remove" | "rename" | "tmpname")) => RiskFlag::FilesystemEscape,
        ("string", Some("dump")) => RiskFlag::Serialization,
        ("os", Some("getenv" | "setlocale")) => RiskFlag::EnvironmentAccess,
        _ => return None,
    };
    Some(flag)
}

/// Modules that open network connections when required.
pub(crate) fn is_socket_module(name: &str) -> bool {
    name.starts_with("socket")
        || name.starts_with("ssl")
        || name.starts_with("http")
        || name == "luasocket"
        || name == "copas"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_classify_members() {
        assert_eq!(
            classify(&path(&["os", "execute"])),
            Some(RiskFlag::ProcessSpawn)
        );
        assert_eq!(
            classify(&path(&["os", "getenv"])),
            Some(RiskFlag::EnvironmentAccess)
        );
        assert_eq!(classify(&path(&["load"])), Some(RiskFlag::DynamicEval));
        assert_eq!(
            classify(&path(&["debug", "getinfo"])),
            Some(RiskFlag::Reflection)
        );
        assert_eq!(classify(&path(&["os", "time"])), None);
        assert_eq!(classify(&path(&["os"])), None);
        assert_eq!(classify(&path(&["string", "format"])), None);
    }

    #[test]
    fn test_socket_modules() {
        assert!(is_socket_module("socket.http"));
        assert!(is_socket_module("ssl.https"));
        assert!(is_socket_module("copas"));
        assert!(!is_socket_module("json"));
    }
}
