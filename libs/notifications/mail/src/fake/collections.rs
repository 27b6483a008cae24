//! Capture stores and assertions for fake mode.

use std::any::{type_name, Any};
use std::sync::{Arc, Mutex, MutexGuard};

use super::Pattern;
use crate::error::AssertionFailure;
use crate::mail::{Mail, PreparedMail};
use crate::message::Message;

/// Append-only list shared between clones
struct Captured<T>(Arc<Mutex<Vec<T>>>);

impl<T> Captured<T> {
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, value: T) {
        self.lock().push(value);
    }

    fn count_where(&self, predicate: impl Fn(&T) -> bool) -> usize {
        self.lock().iter().filter(|&value| predicate(value)).count()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

impl<T> Clone for Captured<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Captured<T> {
    fn default() -> Self {
        Self(Arc::default())
    }
}

fn expect_found(found: bool, describe: impl FnOnce() -> String) -> Result<(), AssertionFailure> {
    if found {
        Ok(())
    } else {
        Err(AssertionFailure::new(describe()))
    }
}

fn expect_count(
    subject: &str,
    action: &str,
    expected: usize,
    actual: usize,
) -> Result<(), AssertionFailure> {
    if expected == actual {
        Ok(())
    } else {
        Err(AssertionFailure::count(subject, action, expected, actual))
    }
}

// -----------------------------------------------------------------------------
// Messages
// -----------------------------------------------------------------------------

/// Messages built with a compose closure (or passed in directly).
#[derive(Clone, Default)]
pub struct MessagesCollection {
    sent: Captured<Message>,
    queued: Captured<Message>,
}

impl MessagesCollection {
    pub(crate) fn record_sent(&self, message: Message) {
        self.sent.push(message);
    }

    pub(crate) fn record_queued(&self, message: Message) {
        self.queued.push(message);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn queued(&self) -> Vec<Message> {
        self.queued.lock().clone()
    }

    /// Sent messages whose wire node matches `pattern`
    pub fn sent_matching(&self, pattern: impl Into<Pattern>) -> Vec<Message> {
        Self::matching(&self.sent, &pattern.into())
    }

    /// Queued messages whose wire node matches `pattern`
    pub fn queued_matching(&self, pattern: impl Into<Pattern>) -> Vec<Message> {
        Self::matching(&self.queued, &pattern.into())
    }

    pub fn assert_sent(&self, pattern: impl Into<Pattern>) -> Result<(), AssertionFailure> {
        Self::assert_found(&self.sent, "sent", pattern.into())
    }

    pub fn assert_sent_where<F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        F: Fn(&Message) -> bool,
    {
        expect_found(self.sent.count_where(predicate) > 0, || {
            "Expected a message matching the predicate to be sent".to_string()
        })
    }

    pub fn assert_not_sent(&self, pattern: impl Into<Pattern>) -> Result<(), AssertionFailure> {
        Self::assert_missing(&self.sent, "sent", pattern.into())
    }

    pub fn assert_not_sent_where<F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        F: Fn(&Message) -> bool,
    {
        expect_found(self.sent.count_where(predicate) == 0, || {
            "Unexpected message matching the predicate was sent".to_string()
        })
    }

    pub fn assert_sent_count(&self, expected: usize) -> Result<(), AssertionFailure> {
        expect_count("messages", "sent", expected, self.sent.len())
    }

    pub fn assert_sent_count_matching(
        &self,
        pattern: impl Into<Pattern>,
        expected: usize,
    ) -> Result<(), AssertionFailure> {
        let pattern = pattern.into();
        let actual = Self::count_matching(&self.sent, &pattern);
        expect_count(&format!("messages matching {:?}", pattern), "sent", expected, actual)
    }

    pub fn assert_none_sent(&self) -> Result<(), AssertionFailure> {
        expect_count("messages", "sent", 0, self.sent.len())
    }

    pub fn assert_queued(&self, pattern: impl Into<Pattern>) -> Result<(), AssertionFailure> {
        Self::assert_found(&self.queued, "queued", pattern.into())
    }

    pub fn assert_queued_where<F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        F: Fn(&Message) -> bool,
    {
        expect_found(self.queued.count_where(predicate) > 0, || {
            "Expected a message matching the predicate to be queued".to_string()
        })
    }

    pub fn assert_not_queued(&self, pattern: impl Into<Pattern>) -> Result<(), AssertionFailure> {
        Self::assert_missing(&self.queued, "queued", pattern.into())
    }

    pub fn assert_not_queued_where<F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        F: Fn(&Message) -> bool,
    {
        expect_found(self.queued.count_where(predicate) == 0, || {
            "Unexpected message matching the predicate was queued".to_string()
        })
    }

    pub fn assert_queued_count(&self, expected: usize) -> Result<(), AssertionFailure> {
        expect_count("messages", "queued", expected, self.queued.len())
    }

    pub fn assert_queued_count_matching(
        &self,
        pattern: impl Into<Pattern>,
        expected: usize,
    ) -> Result<(), AssertionFailure> {
        let pattern = pattern.into();
        let actual = Self::count_matching(&self.queued, &pattern);
        expect_count(&format!("messages matching {:?}", pattern), "queued", expected, actual)
    }

    pub fn assert_none_queued(&self) -> Result<(), AssertionFailure> {
        expect_count("messages", "queued", 0, self.queued.len())
    }

    pub fn clear(&self) {
        self.sent.clear();
        self.queued.clear();
    }

    fn matching(store: &Captured<Message>, pattern: &Pattern) -> Vec<Message> {
        store
            .lock()
            .iter()
            .filter(|message| pattern.is_match(&message.node().to_value()))
            .cloned()
            .collect()
    }

    fn count_matching(store: &Captured<Message>, pattern: &Pattern) -> usize {
        store.count_where(|message| pattern.is_match(&message.node().to_value()))
    }

    fn assert_found(
        store: &Captured<Message>,
        action: &str,
        pattern: Pattern,
    ) -> Result<(), AssertionFailure> {
        expect_found(Self::count_matching(store, &pattern) > 0, || {
            format!("Expected message matching {:?} to be {}", pattern, action)
        })
    }

    fn assert_missing(
        store: &Captured<Message>,
        action: &str,
        pattern: Pattern,
    ) -> Result<(), AssertionFailure> {
        expect_found(Self::count_matching(store, &pattern) == 0, || {
            format!("Unexpected message matching {:?} was {}", pattern, action)
        })
    }
}

// -----------------------------------------------------------------------------
// Mails
// -----------------------------------------------------------------------------

struct MailRecord {
    type_name: &'static str,
    mail: Arc<dyn Any + Send + Sync>,
}

impl MailRecord {
    fn new<M: Mail>(mail: PreparedMail<M>) -> Self {
        Self {
            type_name: short_type_name::<M>(),
            mail: Arc::new(mail),
        }
    }

    fn downcast<M: Mail>(&self) -> Option<Arc<PreparedMail<M>>> {
        self.mail.clone().downcast::<PreparedMail<M>>().ok()
    }

    fn is<M: Mail>(&self) -> bool {
        self.mail.is::<PreparedMail<M>>()
    }
}

/// `VerifyEmail` for `app::mails::VerifyEmail`
fn short_type_name<M>() -> &'static str {
    let full = type_name::<M>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Class-based mails, queryable by type.
#[derive(Clone, Default)]
pub struct MailsCollection {
    sent: Captured<MailRecord>,
    queued: Captured<MailRecord>,
}

impl MailsCollection {
    pub(crate) fn record_sent<M: Mail>(&self, mail: PreparedMail<M>) {
        self.sent.push(MailRecord::new(mail));
    }

    pub(crate) fn record_queued<M: Mail>(&self, mail: PreparedMail<M>) {
        self.queued.push(MailRecord::new(mail));
    }

    /// Sent mails of type `M`, in send order
    pub fn sent<M: Mail>(&self) -> Vec<Arc<PreparedMail<M>>> {
        Self::of_type(&self.sent)
    }

    /// Queued mails of type `M`, in queue order
    pub fn queued<M: Mail>(&self) -> Vec<Arc<PreparedMail<M>>> {
        Self::of_type(&self.queued)
    }

    pub fn assert_sent<M: Mail>(&self) -> Result<(), AssertionFailure> {
        Self::assert_found::<M, _>(&self.sent, "sent", |_| true)
    }

    pub fn assert_sent_where<M, F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        Self::assert_found::<M, F>(&self.sent, "sent", predicate)
    }

    pub fn assert_not_sent<M: Mail>(&self) -> Result<(), AssertionFailure> {
        Self::assert_missing::<M, _>(&self.sent, "sent", |_| true)
    }

    pub fn assert_not_sent_where<M, F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        Self::assert_missing::<M, F>(&self.sent, "sent", predicate)
    }

    /// Total mails sent, of any type
    pub fn assert_sent_count(&self, expected: usize) -> Result<(), AssertionFailure> {
        expect_count("mails", "sent", expected, self.sent.len())
    }

    /// Mails of type `M` sent
    pub fn assert_sent_count_of<M: Mail>(&self, expected: usize) -> Result<(), AssertionFailure> {
        let actual = self.sent.count_where(MailRecord::is::<M>);
        expect_count(short_type_name::<M>(), "sent", expected, actual)
    }

    pub fn assert_none_sent(&self) -> Result<(), AssertionFailure> {
        expect_found(self.sent.len() == 0, || {
            format!(
                "Expected zero mails to be sent, but {} were sent: {}",
                self.sent.len(),
                self.type_names(&self.sent)
            )
        })
    }

    pub fn assert_queued<M: Mail>(&self) -> Result<(), AssertionFailure> {
        Self::assert_found::<M, _>(&self.queued, "queued", |_| true)
    }

    pub fn assert_queued_where<M, F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        Self::assert_found::<M, F>(&self.queued, "queued", predicate)
    }

    pub fn assert_not_queued<M: Mail>(&self) -> Result<(), AssertionFailure> {
        Self::assert_missing::<M, _>(&self.queued, "queued", |_| true)
    }

    pub fn assert_not_queued_where<M, F>(&self, predicate: F) -> Result<(), AssertionFailure>
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        Self::assert_missing::<M, F>(&self.queued, "queued", predicate)
    }

    pub fn assert_queued_count(&self, expected: usize) -> Result<(), AssertionFailure> {
        expect_count("mails", "queued", expected, self.queued.len())
    }

    pub fn assert_queued_count_of<M: Mail>(&self, expected: usize) -> Result<(), AssertionFailure> {
        let actual = self.queued.count_where(MailRecord::is::<M>);
        expect_count(short_type_name::<M>(), "queued", expected, actual)
    }

    pub fn assert_none_queued(&self) -> Result<(), AssertionFailure> {
        expect_found(self.queued.len() == 0, || {
            format!(
                "Expected zero mails to be queued, but {} were queued: {}",
                self.queued.len(),
                self.type_names(&self.queued)
            )
        })
    }

    pub fn clear(&self) {
        self.sent.clear();
        self.queued.clear();
    }

    fn of_type<M: Mail>(store: &Captured<MailRecord>) -> Vec<Arc<PreparedMail<M>>> {
        store.lock().iter().filter_map(MailRecord::downcast::<M>).collect()
    }

    fn count_where<M, F>(store: &Captured<MailRecord>, predicate: F) -> usize
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        Self::of_type::<M>(store)
            .into_iter()
            .filter(|mail| predicate(&**mail))
            .count()
    }

    fn assert_found<M, F>(
        store: &Captured<MailRecord>,
        action: &str,
        predicate: F,
    ) -> Result<(), AssertionFailure>
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        expect_found(Self::count_where::<M, F>(store, predicate) > 0, || {
            format!("Expected mail {} to be {}", short_type_name::<M>(), action)
        })
    }

    fn assert_missing<M, F>(
        store: &Captured<MailRecord>,
        action: &str,
        predicate: F,
    ) -> Result<(), AssertionFailure>
    where
        M: Mail,
        F: Fn(&PreparedMail<M>) -> bool,
    {
        expect_found(Self::count_where::<M, F>(store, predicate) == 0, || {
            format!("Unexpected mail {} was {}", short_type_name::<M>(), action)
        })
    }

    fn type_names(&self, store: &Captured<MailRecord>) -> String {
        store
            .lock()
            .iter()
            .map(|record| record.type_name)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
