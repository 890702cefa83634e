//! Per-page initializer dispatch.
//!
//! A rendered page declares its contexts as classes on the body element,
//! `<body class="page-home extra-widget">`. On page ready the dispatcher runs
//! the `common` initializer, then the initializer registered under the camel
//! case form of every class (`pageHome`, `extraWidget`). Classes without an
//! initializer are skipped. A body carrying the `common` class itself runs
//! `common` a second time.

use std::collections::HashMap;

/// Name of the initializer run on every page.
pub const COMMON: &str = "common";

/// Something run once when a page is ready.
pub trait Initializer: Send + Sync {
    fn init(&self);
}

impl<F> Initializer for F
where
    F: Fn() + Send + Sync,
{
    fn init(&self) {
        self()
    }
}

/// Registry from context name to initializer.
pub struct Dispatcher {
    contexts: HashMap<String, Box<dyn Initializer>>,
}

impl Dispatcher {
    pub fn new(common: impl Initializer + 'static) -> Self {
        let mut contexts: HashMap<String, Box<dyn Initializer>> = HashMap::new();
        contexts.insert(COMMON.to_string(), Box::new(common));
        Self { contexts }
    }

    /// Register the initializer for a context. The name is camel cased, so
    /// both `page-home` and `pageHome` register the same context.
    pub fn register(mut self, name: &str, init: impl Initializer + 'static) -> Self {
        self.contexts.insert(camel_case(name), Box::new(init));
        self
    }

    /// Run `common`, then the initializer of each class in order. Returns the
    /// names that ran. `None` means the body has no class attribute.
    pub fn ready(&self, body_class: Option<&str>) -> Vec<String> {
        let mut ran = Vec::new();

        if let Some(common) = self.contexts.get(COMMON) {
            common.init();
            ran.push(COMMON.to_string());
        }

        for class in body_class.unwrap_or_default().split_whitespace() {
            let name = camel_case(class);
            if let Some(init) = self.contexts.get(&name) {
                init.init();
                ran.push(name);
            }
        }

        ran
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.contexts.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher").field("contexts", &names).finish()
    }
}

/// `page-home` -> `pageHome`. A dash followed by a lowercase letter becomes
/// that letter in upper case; everything else is kept.
pub fn camel_case(class: &str) -> String {
    let mut out = String::with_capacity(class.len());
    let mut chars = class.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('-', Some(next)) if next.is_ascii_lowercase() => {
                out.push(next.to_ascii_uppercase());
                chars.next();
            }
            _ => out.push(c),
        }
    }

    out
}
