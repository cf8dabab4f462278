/// One-way sink for user-visible failure messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str);
}

/// Prints notifications on stderr for the command line front end.
#[derive(Default, Debug)]
pub struct StderrNotifier;

impl Notifier for StderrNotifier {
    fn notify(&self, summary: &str, body: &str) {
        eprintln!("{summary}\n  {body}");
    }
}
