//! Syntax visitor: single-pass extraction of exception-flow facts.
//!
//! Walks a `tree-sitter-python` concrete syntax tree and produces one
//! [`ModuleInfo`] per module: functions with their direct raises, calls
//! (with callable-argument hints), try scopes with handled sets and line
//! ranges, decorators, docstrings, and the module's import table.
//!
//! The guarded region of a try scope covers the `try` body only; code in
//! handlers, `else`, and `finally` runs outside the handlers' protection
//! and is visited with the scope popped. `await` is transparent: calls
//! under it are recorded like synchronous calls.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tree_sitter::{Node, Parser};

/// Sentinel hint for an anonymous function passed as a callable argument.
pub const LAMBDA_SENTINEL: &str = "\u{ab}lambda\u{bb}";

/// Keyword argument names treated as callable-argument positions.
const CALLABLE_KEYWORDS: &[&str] = &["key", "func", "default_factory"];

// ============================================================================
// Errors
// ============================================================================

/// Error type for parsing and visiting.
#[derive(Debug, Error)]
pub enum VisitError {
    /// The source contains syntax errors.
    #[error("syntax error in {module}")]
    Syntax { module: String },

    /// The file could not be read.
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },

    /// The grammar failed to load.
    #[error("parser initialisation failed: {0}")]
    Language(String),
}

/// Result type for visitor operations.
pub type VisitResult<T> = Result<T, VisitError>;

// ============================================================================
// Records
// ============================================================================

/// One observed `raise` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaiseInfo {
    /// The exception class expression as written (`ValueError`,
    /// `errors.ParseError`). Empty for a bare `raise`.
    pub class_expr: String,
    pub line: u32,
    pub column: u32,
    /// First constructor argument when it is a string literal.
    pub message: Option<String>,
    /// True for a bare `raise` or a `raise v` of a handler binding.
    pub is_re_raise: bool,
    /// For a re-raise of a handler binding: the classes that handler
    /// caught. Empty for plain raises and bare re-raises.
    pub caught_classes: Vec<String>,
}

/// Where a callable-argument hint was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HintSlot {
    /// Positional argument index.
    Positional(usize),
    /// Keyword argument name (`key`, `func`, ...).
    Keyword(String),
}

/// A callable passed as an argument: a dotted name, or the lambda
/// sentinel for anonymous functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallableHint {
    pub name: String,
    pub slot: HintSlot,
}

/// One observed call expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Dotted callee when syntactically resolvable; opaque calls (call
    /// results, subscripts) are not recorded.
    pub callee: String,
    pub line: u32,
    pub column: u32,
    /// Last physical line of the call expression, for multi-line
    /// suppression comments.
    pub end_line: u32,
    /// Enclosing try-scope ids in the owner's scope list, innermost last.
    pub enclosing_tries: Vec<usize>,
    pub hints: Vec<CallableHint>,
}

/// One `except` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerInfo {
    /// Caught class names; empty for a universal `except:`.
    pub caught: Vec<String>,
    /// The `as` binding name, when present.
    pub as_name: Option<String>,
    /// True for `except:` with no class.
    pub is_universal: bool,
    /// The handler body re-raises (bare `raise` or `raise <as-name>`);
    /// such a handler does not count as handling.
    pub reraises: bool,
}

/// One `try` block's guarded region and its handlers, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryScope {
    /// First line of the guarded (try body) region.
    pub start_line: u32,
    /// Last line of the guarded region.
    pub end_line: u32,
    pub handlers: Vec<HandlerInfo>,
}

/// One function or method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Bare name (`decode`).
    pub name: String,
    /// Dotted path from the module root (`JSONDecoder.decode`).
    pub qualname: String,
    pub start_line: u32,
    pub end_line: u32,
    pub column: u32,
    /// Decorator expressions as written, without the `@`.
    pub decorators: Vec<String>,
    pub docstring: Option<String>,
    pub raises: Vec<RaiseInfo>,
    pub calls: Vec<CallInfo>,
    pub tries: Vec<TryScope>,
    pub is_async: bool,
    pub is_method: bool,
    pub has_bare_raise: bool,
}

/// Everything the visitor extracts from one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub module_name: String,
    /// Functions keyed by module-relative qualified name.
    pub functions: BTreeMap<String, FunctionInfo>,
    /// Class qualnames defined in this module, for constructor routing.
    pub classes: BTreeSet<String>,
    /// Imported name → full dotted path.
    pub imports: BTreeMap<String, String>,
    /// Calls at module level (outside any function).
    pub module_calls: Vec<CallInfo>,
    /// Try scopes at module level.
    pub module_tries: Vec<TryScope>,
}

// ============================================================================
// Parsing entry points
// ============================================================================

/// Parse a Python file and extract its module facts.
pub fn parse_file(path: &Path, module_name: &str) -> VisitResult<ModuleInfo> {
    let source = std::fs::read_to_string(path).map_err(|e| VisitError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_source(&source, module_name)
}

/// Parse Python source text and extract its module facts.
pub fn parse_source(source: &str, module_name: &str) -> VisitResult<ModuleInfo> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| VisitError::Language(e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| VisitError::Language("parse returned no tree".to_string()))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(VisitError::Syntax {
            module: module_name.to_string(),
        });
    }

    let mut visitor = Visitor::new(source, module_name);
    let mut module_scope = Scope::new();
    visitor.walk_block(root, &mut module_scope);
    visitor.absorb_module_scope(module_scope);
    Ok(visitor.finish())
}

// ============================================================================
// Visitor
// ============================================================================

/// Mutable collection state for one body (a function, or module level).
struct Scope {
    tries: Vec<TryScope>,
    calls: Vec<CallInfo>,
    raises: Vec<RaiseInfo>,
    /// Indices into `tries` for the currently guarded region.
    active_tries: Vec<usize>,
    has_bare_raise: bool,
}

impl Scope {
    fn new() -> Scope {
        Scope {
            tries: Vec::new(),
            calls: Vec::new(),
            raises: Vec::new(),
            active_tries: Vec::new(),
            has_bare_raise: false,
        }
    }
}

/// An `except ... as v:` binding active while its handler body is walked.
struct HandlerBinding {
    name: String,
    caught: Vec<String>,
    try_index: usize,
    handler_index: usize,
}

struct Visitor<'s> {
    source: &'s str,
    module_name: String,
    functions: BTreeMap<String, FunctionInfo>,
    classes: BTreeSet<String>,
    imports: BTreeMap<String, String>,
    class_stack: Vec<String>,
    /// Names of enclosing functions, for nested defs.
    fn_stack: Vec<String>,
    /// Active `as` bindings, innermost last. Cleared across function
    /// boundaries: a nested def's raises are its own.
    bindings: Vec<HandlerBinding>,
    /// (try, handler) currently being walked, innermost last.
    handler_ctx: Vec<(usize, usize)>,
    module_calls: Vec<CallInfo>,
    module_tries: Vec<TryScope>,
}

impl<'s> Visitor<'s> {
    fn new(source: &'s str, module_name: &str) -> Self {
        Visitor {
            source,
            module_name: module_name.to_string(),
            functions: BTreeMap::new(),
            classes: BTreeSet::new(),
            imports: BTreeMap::new(),
            class_stack: Vec::new(),
            fn_stack: Vec::new(),
            bindings: Vec::new(),
            handler_ctx: Vec::new(),
            module_calls: Vec::new(),
            module_tries: Vec::new(),
        }
    }

    /// Fold a body scope's calls and tries into the module-level lists,
    /// re-basing try indices past the entries already present.
    fn absorb_module_scope(&mut self, scope: Scope) {
        let offset = self.module_tries.len();
        self.module_tries.extend(scope.tries);
        for mut call in scope.calls {
            for id in &mut call.enclosing_tries {
                *id += offset;
            }
            self.module_calls.push(call);
        }
    }

    fn finish(self) -> ModuleInfo {
        ModuleInfo {
            module_name: self.module_name,
            functions: self.functions,
            classes: self.classes,
            imports: self.imports,
            module_calls: self.module_calls,
            module_tries: self.module_tries,
        }
    }

    fn text(&self, node: Node) -> &'s str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// Walk the children of a block-like node within the given scope.
    fn walk_block(&mut self, node: Node, scope: &mut Scope) {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        for child in children {
            self.walk_node(child, scope);
        }
    }

    fn walk_node(&mut self, node: Node, scope: &mut Scope) {
        match node.kind() {
            "import_statement" => self.visit_import(node),
            "import_from_statement" => self.visit_import_from(node),
            "class_definition" => self.visit_class(node, scope, &[]),
            "function_definition" => self.visit_function(node, &[]),
            "decorated_definition" => self.visit_decorated(node, scope),
            "try_statement" => self.visit_try(node, scope),
            "raise_statement" => {
                self.visit_raise(node, scope);
                self.walk_block(node, scope);
            }
            "call" => {
                self.visit_call(node, scope);
                // Nested calls in the arguments are visited too.
                self.walk_block(node, scope);
            }
            "lambda" => {
                // Anonymous function bodies are opaque.
            }
            _ => self.walk_block(node, scope),
        }
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    fn visit_import(&mut self, node: Node) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    let name = self.text(child).to_string();
                    self.imports.insert(name.clone(), name);
                }
                "aliased_import" => {
                    let full = child
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_else(|| full.clone());
                    if !full.is_empty() {
                        self.imports.insert(alias, full);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_import_from(&mut self, node: Node) {
        let module = node
            .child_by_field_name("module_name")
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();

        let mut cursor = node.walk();
        let names: Vec<Node> = node.children_by_field_name("name", &mut cursor).collect();
        for child in names {
            match child.kind() {
                "dotted_name" | "identifier" => {
                    let name = self.text(child).to_string();
                    let full = join_module(&module, &name);
                    self.imports.insert(name, full);
                }
                "aliased_import" => {
                    let name = child
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_default();
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| self.text(n).to_string())
                        .unwrap_or_else(|| name.clone());
                    if !name.is_empty() {
                        self.imports.insert(alias, join_module(&module, &name));
                    }
                }
                _ => {}
            }
        }
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    fn visit_decorated(&mut self, node: Node, scope: &mut Scope) {
        let mut decorators = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "decorator" {
                let text = self.text(child).trim_start_matches('@').trim().to_string();
                decorators.push(text);
            }
        }
        if let Some(def) = node.child_by_field_name("definition") {
            match def.kind() {
                "function_definition" => self.visit_function(def, &decorators),
                "class_definition" => self.visit_class(def, scope, &decorators),
                _ => {}
            }
        }
    }

    fn visit_class(&mut self, node: Node, _scope: &mut Scope, _decorators: &[String]) {
        let Some(name) = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
        else {
            return;
        };

        self.class_stack.push(name);
        self.classes.insert(self.scope_qualname());

        if let Some(body) = node.child_by_field_name("body") {
            // Class-level statements run at import time, outside any
            // function; collect them into the module-level records.
            let mut class_scope = Scope::new();
            self.walk_block(body, &mut class_scope);
            self.absorb_module_scope(class_scope);
        }
        self.class_stack.pop();
    }

    fn visit_function(&mut self, node: Node, decorators: &[String]) {
        let Some(name) = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
        else {
            return;
        };

        let is_async = node.child(0).is_some_and(|first| first.kind() == "async");

        self.fn_stack.push(name.clone());
        let qualname = self.scope_qualname();

        let body = node.child_by_field_name("body");
        let docstring = body.and_then(|b| self.extract_docstring(b));

        let mut info = FunctionInfo {
            name,
            qualname: qualname.clone(),
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
            column: node.start_position().column as u32,
            decorators: decorators.to_vec(),
            docstring,
            raises: Vec::new(),
            calls: Vec::new(),
            tries: Vec::new(),
            is_async,
            is_method: !self.class_stack.is_empty(),
            has_bare_raise: false,
        };

        // A nested def is its own raise context: handler bindings of the
        // enclosing function do not re-raise inside it.
        let saved_bindings = std::mem::take(&mut self.bindings);
        let saved_ctx = std::mem::take(&mut self.handler_ctx);

        let mut scope = Scope::new();
        if let Some(body) = body {
            self.walk_block(body, &mut scope);
        }

        self.bindings = saved_bindings;
        self.handler_ctx = saved_ctx;

        info.raises = scope.raises;
        info.calls = scope.calls;
        info.tries = scope.tries;
        info.has_bare_raise = scope.has_bare_raise;
        self.functions.insert(qualname, info);
        self.fn_stack.pop();
    }

    /// Module-relative qualified name for the current scope.
    fn scope_qualname(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        parts.extend(self.class_stack.iter().map(String::as_str));
        parts.extend(self.fn_stack.iter().map(String::as_str));
        parts.join(".")
    }

    fn extract_docstring(&self, body: Node) -> Option<String> {
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let expr = first.named_child(0)?;
        if expr.kind() != "string" {
            return None;
        }
        Some(string_literal_value(self.text(expr)))
    }

    // ------------------------------------------------------------------
    // Try / except
    // ------------------------------------------------------------------

    fn visit_try(&mut self, node: Node, scope: &mut Scope) {
        let body = node.child_by_field_name("body");
        let (start_line, end_line) = match body {
            Some(b) => (
                b.start_position().row as u32 + 1,
                b.end_position().row as u32 + 1,
            ),
            None => (
                node.start_position().row as u32 + 1,
                node.end_position().row as u32 + 1,
            ),
        };

        let mut handler_nodes = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "except_clause" || child.kind() == "except_group_clause" {
                handler_nodes.push(child);
            }
        }

        let handlers: Vec<HandlerInfo> = handler_nodes
            .iter()
            .map(|clause| self.parse_handler_clause(*clause))
            .collect();

        let try_index = scope.tries.len();
        scope.tries.push(TryScope {
            start_line,
            end_line,
            handlers,
        });

        // Guarded region: the try body only.
        if let Some(body) = body {
            scope.active_tries.push(try_index);
            self.walk_block(body, scope);
            scope.active_tries.pop();
        }

        // Handler bodies run with the scope popped; the `as` binding and
        // the handler context are visible while each body is walked.
        for (handler_index, clause) in handler_nodes.into_iter().enumerate() {
            let as_name = scope.tries[try_index].handlers[handler_index].as_name.clone();
            let caught = scope.tries[try_index].handlers[handler_index].caught.clone();

            self.handler_ctx.push((try_index, handler_index));
            let pushed = match as_name {
                Some(name) => {
                    self.bindings.push(HandlerBinding {
                        name,
                        caught,
                        try_index,
                        handler_index,
                    });
                    true
                }
                None => false,
            };

            if let Some(handler_body) = last_block_child(clause) {
                self.walk_block(handler_body, scope);
            }

            if pushed {
                self.bindings.pop();
            }
            self.handler_ctx.pop();
        }

        // else/finally clauses: outside the guarded region.
        let mut cursor = node.walk();
        let tail: Vec<Node> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "else_clause" || c.kind() == "finally_clause")
            .collect();
        for clause in tail {
            if let Some(block) = last_block_child(clause) {
                self.walk_block(block, scope);
            }
        }
    }

    fn parse_handler_clause(&mut self, clause: Node) -> HandlerInfo {
        let mut caught = Vec::new();
        let mut as_name = None;
        let mut saw_type = false;

        let mut cursor = clause.walk();
        for child in clause.named_children(&mut cursor) {
            match child.kind() {
                "as_pattern" => {
                    saw_type = true;
                    let value = child
                        .child_by_field_name("value")
                        .or_else(|| child.named_child(0));
                    if let Some(value) = value {
                        caught.extend(self.exception_names(value));
                    }
                    if let Some(alias) = child.child_by_field_name("alias") {
                        let name = self.text(alias).trim().to_string();
                        if !name.is_empty() {
                            as_name = Some(name);
                        }
                    }
                }
                "block" => {}
                _ => {
                    let names = self.exception_names(child);
                    if !names.is_empty() {
                        saw_type = true;
                        caught.extend(names);
                    }
                }
            }
        }

        HandlerInfo {
            is_universal: !saw_type,
            caught,
            as_name,
            reraises: false,
        }
    }

    /// Flatten an exception expression into class names: a name, a
    /// dotted attribute, or a tuple of either.
    fn exception_names(&self, node: Node) -> Vec<String> {
        match node.kind() {
            "identifier" | "attribute" | "dotted_name" => {
                vec![self.text(node).to_string()]
            }
            "tuple" | "parenthesized_expression" | "expression_list" => {
                let mut names = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    names.extend(self.exception_names(child));
                }
                names
            }
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Raise statements
    // ------------------------------------------------------------------

    fn visit_raise(&mut self, node: Node, scope: &mut Scope) {
        let line = node.start_position().row as u32 + 1;
        let column = node.start_position().column as u32;

        let raised = node.named_child(0);

        let Some(expr) = raised else {
            // Bare raise: re-raise of the active exception. The handler
            // being walked (if any) no longer counts as handling.
            scope.has_bare_raise = true;
            if let Some(&(ti, hi)) = self.handler_ctx.last() {
                mark_reraise(scope, ti, hi);
            }
            scope.raises.push(RaiseInfo {
                class_expr: String::new(),
                line,
                column,
                message: None,
                is_re_raise: true,
                caught_classes: Vec::new(),
            });
            return;
        };

        // `raise v` where v is a handler binding: a re-raise of the
        // caught exception, not a new one.
        if expr.kind() == "identifier" {
            let name = self.text(expr);
            if let Some(pos) = self.bindings.iter().rposition(|b| b.name == name) {
                let binding = &self.bindings[pos];
                let caught = binding.caught.clone();
                mark_reraise(scope, binding.try_index, binding.handler_index);
                scope.raises.push(RaiseInfo {
                    class_expr: String::new(),
                    line,
                    column,
                    message: None,
                    is_re_raise: true,
                    caught_classes: caught,
                });
                return;
            }
        }

        let class_expr = raised_class_expr(expr, self.source);
        if !class_expr.is_empty() {
            scope.raises.push(RaiseInfo {
                class_expr,
                line,
                column,
                message: raise_message(expr, self.source),
                is_re_raise: false,
                caught_classes: Vec::new(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn visit_call(&mut self, node: Node, scope: &mut Scope) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        let Some(callee) = dotted_name(function, self.source) else {
            return;
        };

        let hints = node
            .child_by_field_name("arguments")
            .map(|args| self.collect_hints(args))
            .unwrap_or_default();

        scope.calls.push(CallInfo {
            callee,
            line: node.start_position().row as u32 + 1,
            column: node.start_position().column as u32,
            end_line: node.end_position().row as u32 + 1,
            enclosing_tries: scope.active_tries.clone(),
            hints,
        });
    }

    fn collect_hints(&self, args: Node) -> Vec<CallableHint> {
        let mut hints = Vec::new();
        let mut positional = 0usize;
        let mut cursor = args.walk();
        for arg in args.named_children(&mut cursor) {
            match arg.kind() {
                "keyword_argument" => {
                    let name = arg
                        .child_by_field_name("name")
                        .map(|n| self.text(n))
                        .unwrap_or("");
                    if !CALLABLE_KEYWORDS.contains(&name) {
                        continue;
                    }
                    if let Some(value) = arg.child_by_field_name("value") {
                        if let Some(hint) = hint_expr(value, self.source) {
                            hints.push(CallableHint {
                                name: hint,
                                slot: HintSlot::Keyword(name.to_string()),
                            });
                        }
                    }
                }
                "comment" => {}
                _ => {
                    if let Some(hint) = hint_expr(arg, self.source) {
                        hints.push(CallableHint {
                            name: hint,
                            slot: HintSlot::Positional(positional),
                        });
                    }
                    positional += 1;
                }
            }
        }
        hints
    }
}

fn mark_reraise(scope: &mut Scope, try_index: usize, handler_index: usize) {
    if let Some(t) = scope.tries.get_mut(try_index) {
        if let Some(h) = t.handlers.get_mut(handler_index) {
            h.reraises = true;
        }
    }
}

fn join_module(module: &str, name: &str) -> String {
    if module.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", module, name)
    }
}

// ============================================================================
// Expression helpers
// ============================================================================

/// Dotted text of a name or attribute expression; `None` for anything
/// else (call results, subscripts, literals).
fn dotted_name(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" | "attribute" | "dotted_name" => {
            let text = node.utf8_text(source.as_bytes()).ok()?;
            // Attribute chains over non-name bases (`x[0].f`, `f().g`)
            // are opaque; require a pure dotted path.
            if !text.is_empty()
                && text
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
            {
                Some(text.to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

/// A callable-argument hint expression: a dotted name, or the lambda
/// sentinel. Call results and subscripts are not hints.
fn hint_expr(node: Node, source: &str) -> Option<String> {
    match node.kind() {
        "lambda" => Some(LAMBDA_SENTINEL.to_string()),
        "identifier" | "attribute" => dotted_name(node, source),
        _ => None,
    }
}

/// The class expression of a raise: `raise X` and `raise X(...)` both
/// yield `X` (a name or dotted attribute).
fn raised_class_expr(expr: Node, source: &str) -> String {
    match expr.kind() {
        "call" => expr
            .child_by_field_name("function")
            .and_then(|f| dotted_name(f, source))
            .unwrap_or_default(),
        "identifier" | "attribute" => dotted_name(expr, source).unwrap_or_default(),
        _ => String::new(),
    }
}

/// First constructor argument of a raise, when it is a string literal.
fn raise_message(expr: Node, source: &str) -> Option<String> {
    if expr.kind() != "call" {
        return None;
    }
    let args = expr.child_by_field_name("arguments")?;
    let first = args.named_child(0)?;
    if first.kind() != "string" {
        return None;
    }
    let text = first.utf8_text(source.as_bytes()).ok()?;
    Some(string_literal_value(text))
}

/// Last block child of a clause node (handler/else/finally bodies).
fn last_block_child(node: Node) -> Option<Node> {
    let mut cursor = node.walk();
    let blocks: Vec<Node> = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "block")
        .collect();
    blocks.into_iter().last()
}

/// Strip quotes and prefixes from a string literal's source text.
fn string_literal_value(raw: &str) -> String {
    let mut s = raw.trim();
    // Drop string prefixes (r, b, f, u and combinations).
    while let Some(first) = s.chars().next() {
        if first == '"' || first == '\'' {
            break;
        }
        if first.is_ascii_alphabetic() {
            s = &s[first.len_utf8()..];
        } else {
            break;
        }
    }
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if s.starts_with(quote) && s.ends_with(quote) && s.len() >= 2 * quote.len() {
            return s[quote.len()..s.len() - quote.len()].to_string();
        }
    }
    s.to_string()
}

// ============================================================================
// Tests
// ============================================================================
