//! Parses `_test.go` files for plain tests, suite runners, suite types and
//! suite methods, disambiguating the framework's suite-runner call by how
//! its package is imported. Parse failures on a single file are non-fatal:
//! the file is skipped and its siblings still get parsed, per spec.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser};

use crate::error::WatchError;

/// Import path of the suite-running framework this parser recognizes.
/// The last path segment (`suite`) is the default selector when the
/// import carries no explicit name.
const FRAMEWORK_IMPORT_PATH: &str = "github.com/stretchr/testify/suite";

const RESERVED_METHODS: &[&str] = &["Init", "SetUp", "TearDown", "Finalize"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    pub name: String,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub name: String,
    pub runner: String,
    pub pos: Position,
    pub methods: Vec<Test>,
}

/// Everything discovered across every `_test.go` file in one package
/// directory. Cached inside the owning `TestingPackage` once computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPackage {
    pub tests: Vec<Test>,
    pub suites: Vec<TestSuite>,
}

/// Selector used at a suite-runner call site, resolved per file from that
/// file's import of [`FRAMEWORK_IMPORT_PATH`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum RunnerSelector {
    /// `. "path"` — bare `Run(...)`.
    None,
    /// no name, or an explicit alias — `<selector>.Run(...)`.
    Named(String),
}

/// Parse every `*_test.*` file in `dir` (non-recursive) and return the
/// merged result. `dir` must be the package directory; file iteration
/// order is alphabetical, which is this implementation's stand-in for
/// "the order returned by the directory read" since that order is itself
/// filesystem-dependent and not otherwise observable.
pub fn parse_package(dir: &Path, test_files: &[PathBuf]) -> ParsedPackage {
    let mut tests = Vec::new();
    let mut suites: Vec<TestSuite> = Vec::new();
    // suite type name -> index into `suites`
    let mut suite_index: HashMap<String, usize> = HashMap::new();
    // receiver type -> methods, flushed into suites once all files are parsed
    let mut pending_methods: HashMap<String, Vec<Test>> = HashMap::new();

    let mut sorted_files = test_files.to_vec();
    sorted_files.sort();

    for file in &sorted_files {
        let source = match std::fs::read_to_string(file) {
            Ok(s) => s,
            Err(e) => {
                log_parse_failure(file, &e.to_string());
                continue;
            }
        };

        match parse_file(file, &source) {
            Ok(result) => {
                tests.extend(result.tests);
                for suite in result.suites {
                    let entry = suite_index.entry(suite.name.clone()).or_insert_with(|| {
                        suites.push(TestSuite {
                            name: suite.name.clone(),
                            runner: suite.runner.clone(),
                            pos: suite.pos.clone(),
                            methods: Vec::new(),
                        });
                        suites.len() - 1
                    });
                    let _ = entry;
                }
                for (recv, methods) in result.methods_by_receiver {
                    pending_methods.entry(recv).or_default().extend(methods);
                }
            }
            Err(message) => log_parse_failure(file, &message),
        }
    }

    for suite in &mut suites {
        if let Some(methods) = pending_methods.remove(&suite.name) {
            suite.methods = methods;
        }
    }

    ParsedPackage { tests, suites }
}

fn log_parse_failure(file: &Path, message: &str) {
    let err = WatchError::Parse {
        path: file.to_path_buf(),
        message: message.to_string(),
    };
    tracing::warn!(error = %err, "skipping unparsable test file");
}

struct FileResult {
    tests: Vec<Test>,
    suites: Vec<TestSuite>,
    methods_by_receiver: HashMap<String, Vec<Test>>,
}

fn parse_file(file: &Path, source: &str) -> Result<FileResult, String> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_go::LANGUAGE.into())
        .map_err(|e| e.to_string())?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| "tree-sitter produced no tree".to_string())?;

    let selector = resolve_runner_selector(&tree.root_node(), source);

    let mut tests = Vec::new();
    let mut suites = Vec::new();
    let mut methods_by_receiver: HashMap<String, Vec<Test>> = HashMap::new();

    let root = tree.root_node();
    for i in 0..root.child_count() {
        let Some(node) = root.child(i) else { continue };
        match node.kind() {
            "function_declaration" => {
                if let Some(name) = function_name(&node, source) {
                    if name.starts_with("Test") {
                        if let Some(runner_call) =
                            selector.as_ref().and_then(|s| find_runner_call(&node, source, s))
                        {
                            suites.push(TestSuite {
                                name: runner_call.suite_name,
                                runner: name,
                                pos: position(file, runner_call.node.start_position()),
                                methods: Vec::new(),
                            });
                        } else {
                            tests.push(Test {
                                name,
                                pos: position(file, node.start_position()),
                            });
                        }
                    }
                }
            }
            "method_declaration" => {
                if let Some((receiver, method)) = suite_method(&node, source, file) {
                    methods_by_receiver.entry(receiver).or_default().push(method);
                }
            }
            _ => {}
        }
    }

    Ok(FileResult {
        tests,
        suites,
        methods_by_receiver,
    })
}

fn position(file: &Path, p: tree_sitter::Point) -> Position {
    Position {
        file: file.to_path_buf(),
        line: p.row + 1,
        column: p.column + 1,
    }
}

fn function_name(node: &Node, source: &str) -> Option<String> {
    node.child_by_field_name("name")?
        .utf8_text(source.as_bytes())
        .ok()
        .map(|s| s.to_string())
}

/// Resolve how this file imports the suite framework, if at all.
fn resolve_runner_selector(root: &Node, source: &str) -> Option<RunnerSelector> {
    let mut cursor = root.walk();
    for node in root.children(&mut cursor) {
        if node.kind() != "import_declaration" {
            continue;
        }
        if let Some(sel) = scan_import_declaration(&node, source) {
            return Some(sel);
        }
    }
    None
}

fn scan_import_declaration(decl: &Node, source: &str) -> Option<RunnerSelector> {
    // import_declaration wraps either a single import_spec or an
    // import_spec_list (parenthesized form).
    let mut cursor = decl.walk();
    for child in decl.children(&mut cursor) {
        match child.kind() {
            "import_spec" => {
                if let Some(sel) = import_spec_selector(&child, source) {
                    return Some(sel);
                }
            }
            "import_spec_list" => {
                let mut inner = child.walk();
                for spec in child.children(&mut inner) {
                    if spec.kind() == "import_spec" {
                        if let Some(sel) = import_spec_selector(&spec, source) {
                            return Some(sel);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn import_spec_selector(spec: &Node, source: &str) -> Option<RunnerSelector> {
    let path_node = spec.child_by_field_name("path")?;
    let raw = path_node.utf8_text(source.as_bytes()).ok()?;
    let path = raw.trim_matches(|c| c == '"' || c == '`');
    if path != FRAMEWORK_IMPORT_PATH {
        return None;
    }

    let selector = match spec.child_by_field_name("name") {
        Some(name_node) if name_node.kind() == "dot" => RunnerSelector::None,
        Some(name_node) => {
            let alias = name_node.utf8_text(source.as_bytes()).ok()?.to_string();
            RunnerSelector::Named(alias)
        }
        None => {
            let last = path.rsplit('/').next().unwrap_or(path);
            RunnerSelector::Named(last.to_string())
        }
    };
    Some(selector)
}

struct RunnerCall<'a> {
    suite_name: String,
    node: Node<'a>,
}

/// Search the function body for a call matching `selector.Run(arg)` (or
/// bare `Run(arg)` for a dot-import), and extract the suite type name from
/// the argument.
fn find_runner_call<'a>(
    func: &Node<'a>,
    source: &str,
    selector: &RunnerSelector,
) -> Option<RunnerCall<'a>> {
    let body = func.child_by_field_name("body")?;
    let mut found = None;
    walk_calls(&body, &mut |call| {
        if found.is_some() {
            return;
        }
        if !is_runner_call(call, source, selector) {
            return;
        }
        if let Some(arg) = call.child_by_field_name("arguments") {
            if let Some(suite_name) = suite_arg_name(&arg, source) {
                found = Some(RunnerCall {
                    suite_name,
                    node: *call,
                });
            }
        }
    });
    found
}

fn walk_calls<'a>(node: &Node<'a>, f: &mut impl FnMut(&Node<'a>)) {
    if node.kind() == "call_expression" {
        f(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_calls(&child, f);
    }
}

fn is_runner_call(call: &Node, source: &str, selector: &RunnerSelector) -> bool {
    let Some(func) = call.child_by_field_name("function") else {
        return false;
    };
    match selector {
        RunnerSelector::None => {
            func.kind() == "identifier"
                && func.utf8_text(source.as_bytes()).ok() == Some("Run")
        }
        RunnerSelector::Named(name) => {
            if func.kind() != "selector_expression" {
                return false;
            }
            let operand = func.child_by_field_name("operand");
            let field = func.child_by_field_name("field");
            let operand_text = operand.and_then(|n| n.utf8_text(source.as_bytes()).ok());
            let field_text = field.and_then(|n| n.utf8_text(source.as_bytes()).ok());
            operand_text == Some(name.as_str()) && field_text == Some("Run")
        }
    }
}

/// Extract the suite type name from the runner-call argument list. Three
/// shapes are recognized: a bare identifier (`Run(t, fxs)`), a composite
/// literal behind `&` (`Run(t, &FxS{})`), and `new(FxS)`.
fn suite_arg_name(args: &Node, source: &str) -> Option<String> {
    let mut cursor = args.walk();
    for child in args.children(&mut cursor) {
        match child.kind() {
            "identifier" => {
                return child.utf8_text(source.as_bytes()).ok().map(|s| s.to_string());
            }
            "unary_expression" => {
                // &CompositeLit{...}
                let operand = child.child_by_field_name("operand")?;
                if operand.kind() == "composite_literal" {
                    let type_node = operand.child_by_field_name("type")?;
                    return type_node
                        .utf8_text(source.as_bytes())
                        .ok()
                        .map(|s| s.to_string());
                }
            }
            "call_expression" => {
                // new(FxS)
                let func = child.child_by_field_name("function")?;
                if func.kind() != "identifier" || func.utf8_text(source.as_bytes()).ok() != Some("new") {
                    continue;
                }
                let inner_args = child.child_by_field_name("arguments")?;
                let mut inner_cursor = inner_args.walk();
                for inner in inner_args.children(&mut inner_cursor) {
                    if inner.kind() == "type_identifier" || inner.kind() == "identifier" {
                        return inner.utf8_text(source.as_bytes()).ok().map(|s| s.to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn suite_method(node: &Node, source: &str, file: &Path) -> Option<(String, Test)> {
    let receiver_list = node.child_by_field_name("receiver")?;
    let receiver_type = receiver_type_name(&receiver_list, source)?;

    let name = function_name(node, source)?;
    if !starts_uppercase(&name) || RESERVED_METHODS.contains(&name.as_str()) {
        return None;
    }

    let params = node.child_by_field_name("parameters")?;
    if count_parameters(&params) != 1 {
        return None;
    }

    Some((
        receiver_type,
        Test {
            name,
            pos: position(file, node.start_position()),
        },
    ))
}

fn receiver_type_name(receiver_list: &Node, source: &str) -> Option<String> {
    let mut cursor = receiver_list.walk();
    for child in receiver_list.children(&mut cursor) {
        if child.kind() == "parameter_declaration" {
            let type_node = child.child_by_field_name("type")?;
            let text = type_node.utf8_text(source.as_bytes()).ok()?;
            return Some(text.trim_start_matches('*').to_string());
        }
    }
    None
}

fn count_parameters(params: &Node) -> usize {
    let mut count = 0;
    let mut cursor = params.walk();
    for child in params.children(&mut cursor) {
        if child.kind() == "parameter_declaration" {
            count += 1;
        }
    }
    count
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().map_or(false, |c| c.is_uppercase())
}

/// Cheap membership check used by the Scanner: does this `_test.go` source
/// declare at least one top-level, no-receiver function whose name begins
/// with `Test`? Used only to classify a directory as a testing package —
/// the full parse (suites, methods) is deferred until a caller asks.
pub fn has_test_function(source: &str) -> bool {
    let mut parser = Parser::new();
    if parser.set_language(&tree_sitter_go::LANGUAGE.into()).is_err() {
        return false;
    }
    let Some(tree) = parser.parse(source, None) else {
        return false;
    };
    let root = tree.root_node();
    for i in 0..root.child_count() {
        let Some(node) = root.child(i) else { continue };
        if node.kind() != "function_declaration" {
            continue;
        }
        if let Some(name) = function_name(&node, source) {
            if name.starts_with("Test") {
                return true;
            }
        }
    }
    false
}
