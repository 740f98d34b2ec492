//! Structural pass: walks the syntax tree and resolves what every name,
//! index and call can refer to.
//!
//! Resolution is flow-insensitive. Every value ever assigned to a binding
//! counts for every use of that binding, so the walk is repeated until the
//! binding facts stop growing and the findings of the last round are kept.
//! A source that hits the round ceiling first is reported as `reflection`.
//!
//! ```text
//! local o = os            o -> {os}
//! local e = o["ex".."ecute"]   e -> {os.execute}   (flagged here)
//! e("rm -rf /")           flagged again on this line
//! ```

use super::catalogue;
use super::syntax::ast::{BinOp, Block, Expr, Field, FuncBody, Stat};
use super::{ParsedSource, ScanPass};
use std::collections::{BTreeSet, HashMap};
use toolgate_domain::{Finding, PassKind, RiskFlag};

/// Rounds always allowed, enough for a concatenation loop to saturate
/// `MAX_FOLDED_KEYS`.
const MIN_ROUNDS: usize = 2 * MAX_FOLDED_KEYS;

/// Hard ceiling on fixpoint rounds.
const MAX_ROUNDS: usize = 1024;

/// Paths longer than this add nothing the catalogue can classify.
const MAX_PATH_LEN: usize = 3;

/// Cap on the number of strings a constant key can fold to.
const MAX_FOLDED_KEYS: usize = 32;

type Path = Vec<String>;

pub struct StructuralPass;

impl ScanPass for StructuralPass {
    fn kind(&self) -> PassKind {
        PassKind::Structural
    }

    fn run(&self, source: &ParsedSource<'_>) -> Vec<Finding> {
        match source.chunk {
            Some(chunk) => analyze(chunk),
            None => Vec::new(),
        }
    }
}

/// Everything known about the values a binding may hold.
#[derive(Debug, Clone, Default, PartialEq)]
struct Facts {
    /// Tracked global paths, e.g. `["os"]` or `["io", "popen"]`.
    origins: BTreeSet<Path>,
    /// Constant strings.
    strings: BTreeSet<String>,
    /// Assigned something that is neither of the above.
    opaque: bool,
}

impl Facts {
    fn opaque() -> Self {
        Self {
            opaque: true,
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: Facts) {
        self.origins.extend(other.origins);
        self.strings.extend(other.strings);
        self.opaque |= other.opaque;
    }

    /// The strings this binding folds to, if it only ever holds constants.
    fn constant_strings(&self) -> Option<BTreeSet<String>> {
        (!self.opaque && self.origins.is_empty() && !self.strings.is_empty())
            .then(|| self.strings.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct FactTable {
    locals: HashMap<usize, Facts>,
    globals: HashMap<String, Facts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Use {
    /// Bound to a local, used as an index prefix, called or inspected.
    Contained,
    /// Stored in a table, passed, returned or otherwise out of sight.
    Escape,
}

pub(crate) fn analyze(chunk: &Block) -> Vec<Finding> {
    let mut table = FactTable::default();
    let mut rounds = 0;
    loop {
        let before = table.clone();
        let (mut findings, locals) = {
            let mut walker = Walker::new(&mut table);
            walker.block(chunk);
            (walker.findings, walker.next_binding)
        };
        rounds += 1;
        if table == before {
            return findings;
        }

        // Every round moves each alias at least one binding along its chain.
        let limit = (locals + table.globals.len() + 2).clamp(MIN_ROUNDS, MAX_ROUNDS);
        if rounds >= limit {
            findings.push(Finding::new(
                RiskFlag::Reflection,
                PassKind::Structural,
                "alias analysis did not converge",
            ));
            return findings;
        }
    }
}

struct Walker<'t> {
    facts: &'t mut FactTable,
    scopes: Vec<HashMap<String, usize>>,
    next_binding: usize,
    findings: Vec<Finding>,
}

impl<'t> Walker<'t> {
    fn new(facts: &'t mut FactTable) -> Self {
        Self {
            facts,
            scopes: Vec::new(),
            next_binding: 0,
            findings: Vec::new(),
        }
    }

    fn flag(&mut self, flag: RiskFlag, line: u32, detail: impl Into<String>) {
        self.findings
            .push(Finding::new(flag, PassKind::Structural, detail).at_line(line));
    }

    // ==================== Scopes ====================

    fn resolve(&self, name: &str) -> Option<usize> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn declare(&mut self, name: &str, facts: Facts) {
        let id = self.next_binding;
        self.next_binding += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
        self.facts.locals.entry(id).or_default().absorb(facts);
    }

    fn assign_name(&mut self, name: &str, facts: Facts) {
        match self.resolve(name) {
            Some(id) => self.facts.locals.entry(id).or_default().absorb(facts),
            None => self
                .facts
                .globals
                .entry(name.to_string())
                .or_default()
                .absorb(facts),
        }
    }

    /// Facts of `name` as bound here, without the global itself.
    fn bound_facts(&self, name: &str) -> Facts {
        match self.resolve(name) {
            Some(id) => self.facts.locals.get(&id).cloned().unwrap_or_default(),
            None => self.facts.globals.get(name).cloned().unwrap_or_default(),
        }
    }

    fn origins_of_name(&self, name: &str) -> BTreeSet<Path> {
        let local = self.resolve(name).is_some();
        let mut origins = self.bound_facts(name).origins;
        if !local && catalogue::is_tracked_root(name) {
            origins.insert(vec![name.to_string()]);
        }
        origins
    }

    // ==================== Constant folding ====================

    /// Strings `expr` evaluates to, if it is built only from constants.
    fn fold(&self, expr: &Expr) -> Option<BTreeSet<String>> {
        match expr {
            Expr::Str(s) => Some(BTreeSet::from([s.clone()])),
            Expr::Int(i) => Some(BTreeSet::from([i.to_string()])),
            Expr::Paren(inner) => self.fold(inner),
            Expr::Name { name, .. } => self.bound_facts(name).constant_strings(),
            Expr::Binary {
                op: BinOp::Concat,
                lhs,
                rhs,
            } => {
                let left = self.fold(lhs)?;
                let right = self.fold(rhs)?;
                if left.len() * right.len() > MAX_FOLDED_KEYS {
                    return None;
                }
                Some(
                    left.iter()
                        .flat_map(|l| right.iter().map(move |r| format!("{}{}", l, r)))
                        .collect(),
                )
            }
            _ => None,
        }
    }

    fn value_facts(&self, expr: &Expr, origins: BTreeSet<Path>) -> Facts {
        let strings = self.fold(expr);
        let opaque = origins.is_empty() && strings.is_none() && !matches!(expr, Expr::Nil);
        Facts {
            origins,
            strings: strings.unwrap_or_default(),
            opaque,
        }
    }

    // ==================== Reporting ====================

    fn report(&mut self, origins: &BTreeSet<Path>, line: u32, use_: Use) {
        for path in origins {
            if let Some(flag) = catalogue::classify(path) {
                self.flag(flag, line, path.join("."));
            }
            if use_ == Use::Escape
                && path.len() == 1
                && let Some(flag) = catalogue::module_escape_flag(&path[0])
            {
                self.flag(flag, line, format!("{} module escapes", path[0]));
            }
        }
    }

    // ==================== Statements ====================

    fn block(&mut self, block: &Block) {
        self.scopes.push(HashMap::new());
        self.block_body(block);
        self.scopes.pop();
    }

    /// A block's statements in the current scope.
    fn block_body(&mut self, block: &Block) {
        for stat in &block.stats {
            self.stat(stat);
        }
        if let Some(ret) = &block.ret {
            for expr in &ret.exprs {
                self.expr(expr, Use::Escape);
            }
        }
    }

    fn function(&mut self, func: &FuncBody) {
        self.scopes.push(HashMap::new());
        for param in &func.params {
            self.declare(param, Facts::opaque());
        }
        self.block(&func.body);
        self.scopes.pop();
    }

    /// Evaluate the right-hand side of an assignment to `targets` names.
    fn values(&mut self, exprs: &[Expr], targets: &[Use]) -> Vec<Facts> {
        let mut values = Vec::with_capacity(targets.len());
        for (i, expr) in exprs.iter().enumerate() {
            let use_ = targets.get(i).copied().unwrap_or(Use::Escape);
            let origins = self.expr(expr, use_);
            if i < targets.len() {
                values.push(self.value_facts(expr, origins));
            }
        }
        let multi = exprs.last().is_some_and(Expr::is_multi_valued);
        while values.len() < targets.len() {
            values.push(if multi { Facts::opaque() } else { Facts::default() });
        }
        values
    }

    fn stat(&mut self, stat: &Stat) {
        match stat {
            Stat::Local { names, exprs, .. } => {
                let uses = vec![Use::Contained; names.len()];
                let values = self.values(exprs, &uses);
                for (name, facts) in names.iter().zip(values) {
                    self.declare(name, facts);
                }
            }
            Stat::LocalFunction { name, func } => {
                self.declare(name, Facts::opaque());
                self.function(func);
            }
            Stat::Function { name, func } => {
                let root = &name.path[0];
                if name.path.len() == 1 && name.method.is_none() {
                    if catalogue::is_tracked_root(root) && self.resolve(root).is_none() {
                        self.flag(RiskFlag::Reflection, name.line, format!("redefines {}", root));
                    }
                    self.assign_name(root, Facts::opaque());
                } else {
                    let mut origins = self.origins_of_name(root);
                    self.report(&origins, name.line, Use::Contained);
                    for key in name.path[1..].iter().chain(name.method.iter()) {
                        origins = extend(&origins, &BTreeSet::from([key.clone()]));
                        self.report(&origins, name.line, Use::Contained);
                    }
                }
                self.function(func);
            }
            Stat::Assign { targets, exprs } => {
                let uses: Vec<Use> = targets
                    .iter()
                    .map(|t| match t {
                        Expr::Name { .. } => Use::Contained,
                        _ => Use::Escape,
                    })
                    .collect();
                let values = self.values(exprs, &uses);
                for (target, facts) in targets.iter().zip(values) {
                    match target {
                        Expr::Name { name, line } => {
                            if catalogue::is_environment(name) && self.resolve(name).is_none() {
                                self.flag(RiskFlag::Reflection, *line, format!("assigns {}", name));
                            }
                            self.assign_name(name, facts);
                        }
                        other => {
                            self.expr(other, Use::Contained);
                        }
                    }
                }
            }
            Stat::Call(expr) => {
                self.expr(expr, Use::Contained);
            }
            Stat::Do(body) => self.block(body),
            Stat::While { cond, body } => {
                self.expr(cond, Use::Contained);
                self.block(body);
            }
            Stat::Repeat { body, cond } => {
                // The condition sees the body's locals.
                self.scopes.push(HashMap::new());
                self.block_body(body);
                self.expr(cond, Use::Contained);
                self.scopes.pop();
            }
            Stat::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    self.expr(cond, Use::Contained);
                    self.block(body);
                }
                if let Some(body) = otherwise {
                    self.block(body);
                }
            }
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.expr(start, Use::Contained);
                self.expr(limit, Use::Contained);
                if let Some(step) = step {
                    self.expr(step, Use::Contained);
                }
                self.scopes.push(HashMap::new());
                self.declare(var, Facts::opaque());
                self.block(body);
                self.scopes.pop();
            }
            Stat::GenericFor { vars, exprs, body } => {
                for expr in exprs {
                    self.expr(expr, Use::Escape);
                }
                self.scopes.push(HashMap::new());
                for var in vars {
                    self.declare(var, Facts::opaque());
                }
                self.block(body);
                self.scopes.pop();
            }
            Stat::Goto(_) | Stat::Label(_) | Stat::Break => {}
        }
    }

    // ==================== Expressions ====================

    /// Walk `expr`, report what it touches, and return the tracked paths it
    /// may evaluate to.
    fn expr(&mut self, expr: &Expr, use_: Use) -> BTreeSet<Path> {
        match expr {
            Expr::Name { name, line } => {
                let origins = self.origins_of_name(name);
                self.report(&origins, *line, use_);
                origins
            }
            Expr::Index { object, key, line } => {
                let objects = self.expr(object, Use::Contained);
                let folded = self.fold(key);
                self.expr(key, Use::Escape);
                let origins = match folded {
                    Some(keys) => {
                        if objects.is_empty() && keys.contains("dump") {
                            self.flag(RiskFlag::Serialization, *line, "dump");
                        }
                        extend(&objects, &keys)
                    }
                    None => {
                        for path in &objects {
                            if path.len() == 1 && catalogue::is_sensitive_module(&path[0]) {
                                self.flag(
                                    RiskFlag::Reflection,
                                    *line,
                                    format!("computed index on {}", path[0]),
                                );
                            }
                        }
                        BTreeSet::new()
                    }
                };
                self.report(&origins, *line, use_);
                origins
            }
            Expr::Call { callee, args, line } => {
                let callees = self.expr(callee, Use::Contained);
                for arg in args {
                    self.expr(arg, Use::Escape);
                }
                let mut result = BTreeSet::new();
                if callees.iter().any(|p| p.len() == 1 && p[0] == "require")
                    && let Some(modules) = args.first().and_then(|a| self.fold(a))
                {
                    for module in modules {
                        if catalogue::is_socket_module(&module) {
                            self.flag(
                                RiskFlag::RawSocket,
                                *line,
                                format!("require(\"{}\")", module),
                            );
                        }
                        if catalogue::is_tracked_root(&module) {
                            result.insert(vec![module]);
                        }
                    }
                }
                self.report(&result, *line, use_);
                result
            }
            Expr::Method {
                object,
                method,
                args,
                line,
            } => {
                let objects = self.expr(object, Use::Contained);
                let paths = extend(&objects, &BTreeSet::from([method.clone()]));
                self.report(&paths, *line, Use::Contained);
                if method == "dump" && paths.is_empty() {
                    self.flag(RiskFlag::Serialization, *line, ":dump()");
                }
                for arg in args {
                    self.expr(arg, Use::Escape);
                }
                BTreeSet::new()
            }
            Expr::Paren(inner) => self.expr(inner, use_),
            Expr::Function(func) => {
                self.function(func);
                BTreeSet::new()
            }
            Expr::Table(fields) => {
                for field in fields {
                    match field {
                        Field::Named { value, .. } | Field::Positional(value) => {
                            self.expr(value, Use::Escape);
                        }
                        Field::Keyed { key, value } => {
                            self.expr(key, Use::Escape);
                            self.expr(value, Use::Escape);
                        }
                    }
                }
                BTreeSet::new()
            }
            Expr::Binary {
                op: BinOp::And | BinOp::Or,
                lhs,
                rhs,
            } => {
                // Either operand may be the result.
                let mut origins = self.expr(lhs, use_);
                origins.extend(self.expr(rhs, use_));
                origins
            }
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs, Use::Contained);
                self.expr(rhs, Use::Contained);
                BTreeSet::new()
            }
            Expr::Unary { operand, .. } => {
                self.expr(operand, Use::Contained);
                BTreeSet::new()
            }
            Expr::Nil
            | Expr::True
            | Expr::False
            | Expr::Vararg
            | Expr::Int(_)
            | Expr::Float(_)
            | Expr::Str(_) => BTreeSet::new(),
        }
    }
}

/// Index every tracked path in `objects` by every key.
///
/// Indexing an environment table yields the global of that name.
fn extend(objects: &BTreeSet<Path>, keys: &BTreeSet<String>) -> BTreeSet<Path> {
    let mut out = BTreeSet::new();
    for object in objects {
        for key in keys {
            let path = if object.len() == 1 && catalogue::is_environment(&object[0]) {
                vec![key.clone()]
            } else {
                let mut path = object.clone();
                path.push(key.clone());
                path
            };
            if path.len() <= MAX_PATH_LEN && catalogue::is_tracked_root(&path[0]) {
                out.insert(path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::syntax::parse_chunk;

    fn flags(src: &str) -> BTreeSet<RiskFlag> {
        let chunk = parse_chunk(src.as_bytes(), 200).unwrap();
        analyze(&chunk).into_iter().map(|f| f.flag).collect()
    }

    fn lines_for(src: &str, flag: RiskFlag) -> Vec<u32> {
        let chunk = parse_chunk(src.as_bytes(), 200).unwrap();
        analyze(&chunk)
            .into_iter()
            .filter(|f| f.flag == flag)
            .filter_map(|f| f.line)
            .collect()
    }

    #[test]
    fn test_clean_code_has_no_findings() {
        let src = r#"
local function run(args)
  local parts = {}
  for word in string.gmatch(args.text, "%S+") do
    parts[#parts + 1] = string.upper(word)
  end
  return table.concat(parts, " ") .. os.time()
end
return { name = "shout", run = run }
"#;
        assert!(flags(src).is_empty());
    }

    #[test]
    fn test_local_alias_is_followed() {
        let src = "local o = os\nlocal x = 1\no.execute('ls')";
        assert_eq!(lines_for(src, RiskFlag::ProcessSpawn), vec![3]);
    }

    #[test]
    fn test_alias_assigned_after_use_is_followed() {
        // The reference inside `f` comes before the assignment in source order.
        let src = r#"
local o
local function f() return o.popen("id") end
o = io
"#;
        assert!(flags(src).contains(&RiskFlag::ProcessSpawn));
    }

    #[test]
    fn test_long_alias_chain_is_followed() {
        // Each link is assigned from the next one, later in source order.
        let n = 150;
        let mut src = String::new();
        for i in 1..=n {
            src.push_str(&format!("local a{}\n", i));
        }
        for i in 1..n {
            src.push_str(&format!("a{} = a{}\n", i, i + 1));
        }
        src.push_str(&format!("a{} = os\n", n));
        src.push_str("return { name = 'sneak', run = function() return a1.execute('id') end }");

        let found = flags(&src);
        assert!(found.contains(&RiskFlag::ProcessSpawn), "{:?}", found);
        assert!(!found.contains(&RiskFlag::Reflection));
    }

    #[test]
    fn test_unconverged_analysis_is_not_clean() {
        let n = MAX_ROUNDS + 8;
        let mut src = String::new();
        for i in 1..n {
            src.push_str(&format!("g{} = g{}\n", i, i + 1));
        }
        src.push_str(&format!("g{} = os\ng1.execute('id')", n));

        let chunk = parse_chunk(src.as_bytes(), 200).unwrap();
        let findings = analyze(&chunk);
        assert!(findings.iter().any(|f| f.flag == RiskFlag::Reflection
            && f.detail == "alias analysis did not converge"));
    }

    #[test]
    fn test_global_alias_and_member_alias() {
        assert!(flags("exec = io.popen\nexec('id')").contains(&RiskFlag::ProcessSpawn));
        assert_eq!(
            lines_for("local e = os.execute\n\ne('ls')", RiskFlag::ProcessSpawn),
            vec![1, 3]
        );
    }

    #[test]
    fn test_constant_folded_keys() {
        assert!(flags(r#"os["ex" .. "ecute"]("ls")"#).contains(&RiskFlag::ProcessSpawn));
        assert!(
            flags("local k = 'exe' .. 'cute'\nlocal o = os\no[k]('ls')")
                .contains(&RiskFlag::ProcessSpawn)
        );
    }

    #[test]
    fn test_environment_indirection() {
        let found = flags(r#"_G["os"].execute("ls")"#);
        assert!(found.contains(&RiskFlag::ProcessSpawn));
        assert!(found.contains(&RiskFlag::Reflection));

        let found = flags("local s = 'io'\nlocal m = _ENV[s]\nm.open('/etc/passwd')");
        assert!(found.contains(&RiskFlag::FilesystemEscape));
    }

    #[test]
    fn test_computed_index_on_module_is_reflection() {
        let found = flags("local function run(args) return os[args.name]() end");
        assert_eq!(found, BTreeSet::from([RiskFlag::Reflection]));
    }

    #[test]
    fn test_module_escape_uses_module_category() {
        assert_eq!(
            flags("local t = { os }"),
            BTreeSet::from([RiskFlag::ProcessSpawn])
        );
        assert_eq!(
            flags("local function f(m) end\nf(io)"),
            BTreeSet::from([RiskFlag::FilesystemEscape])
        );
        // Binding and inspection do not escape.
        assert!(flags("local o = os\nif o then end").is_empty());
    }

    #[test]
    fn test_require_resolution() {
        let found = flags("local m = require('os')\nm.execute('ls')");
        assert!(found.contains(&RiskFlag::DynamicImport));
        assert!(found.contains(&RiskFlag::ProcessSpawn));

        let found = flags("local s = require('socket.http')");
        assert!(found.contains(&RiskFlag::RawSocket));
    }

    #[test]
    fn test_parameters_shadow_globals() {
        let src = "local function run(os) return os.execute end";
        assert!(flags(src).is_empty());
        let src = "for _, io in ipairs({}) do io.popen('x') end";
        assert!(flags(src).is_empty());
    }

    #[test]
    fn test_reference_without_call_is_flagged() {
        assert_eq!(
            flags("local f = load"),
            BTreeSet::from([RiskFlag::DynamicEval])
        );
        assert_eq!(
            flags("local t = { getenv = os.getenv }"),
            BTreeSet::from([RiskFlag::EnvironmentAccess])
        );
    }

    #[test]
    fn test_dump_and_metatables() {
        assert!(flags("local b = string.dump(print)").contains(&RiskFlag::Serialization));
        assert!(flags("local b = (f):dump()").contains(&RiskFlag::Serialization));
        assert!(flags("setmetatable({}, {})").contains(&RiskFlag::Reflection));
    }

    #[test]
    fn test_code_inside_descriptor_table_is_walked() {
        let src = r#"
return {
  name = "x",
  run = function(args)
    local d = debug
    return d.traceback()
  end,
}
"#;
        assert_eq!(lines_for(src, RiskFlag::Reflection), vec![6]);
    }
}
