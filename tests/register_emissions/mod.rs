use std::sync::{Arc, Mutex};

use rxcore::subscribe::Subscriber;

/// Records every signal delivered to the subscribers it hands out.
pub struct Emissions<T> {
    nexts: Arc<Mutex<Vec<T>>>,
    errors: Arc<Mutex<Vec<String>>>,
    completes: Arc<Mutex<usize>>,
}

impl<T: Clone + Send + 'static> Emissions<T> {
    pub fn new() -> Self {
        Emissions {
            nexts: Arc::new(Mutex::new(Vec::with_capacity(16))),
            errors: Arc::new(Mutex::new(Vec::new())),
            completes: Arc::new(Mutex::new(0)),
        }
    }

    pub fn subscriber(&self) -> Subscriber<T> {
        let nexts = Arc::clone(&self.nexts);
        let errors = Arc::clone(&self.errors);
        let completes = Arc::clone(&self.completes);

        Subscriber::new(
            move |n| {
                // Track next() calls.
                nexts.lock().unwrap().push(n);
            },
            move |e| {
                // Track error() calls.
                errors.lock().unwrap().push(e.to_string());
            },
            move || {
                // Track complete() calls.
                *completes.lock().unwrap() += 1;
            },
        )
    }

    pub fn nexts(&self) -> Vec<T> {
        self.nexts.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    pub fn completes(&self) -> usize {
        *self.completes.lock().unwrap()
    }
}
