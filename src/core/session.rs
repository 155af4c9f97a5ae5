//! Compilation state for one target.

use crate::core::action::Action;
use crate::core::context::{Context, Overrides};
use crate::core::managed::{Offline, Probe};
use crate::core::node::Endpoint;
use crate::core::script::{Fragment, HostScript, Segment, Step};
use crate::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use tracing::debug;

/// Everything an action sees and produces while one target compiles.
///
/// A [Session] owns the current [Context], the stack of contexts saved by enclosing scopes, the
/// flags raised so far, and the [Step]s emitted so far. Sessions are never shared between targets.
pub struct Session {
    context: Context,
    saved: Vec<Context>,
    flags: BTreeSet<String>,
    steps: Vec<Step>,
    probe: Box<dyn Probe + Send>,
    endpoint: Option<Endpoint>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .field("saved", &self.saved)
            .field("flags", &self.flags)
            .field("steps", &self.steps)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Context::default())
    }
}

impl Session {
    pub fn new(context: Context) -> Self {
        Session {
            context,
            saved: vec![],
            flags: BTreeSet::new(),
            steps: vec![],
            probe: Box::new(Offline),
            endpoint: None,
        }
    }

    pub fn with_probe(mut self, probe: impl Probe + Send + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    pub fn with_boxed_probe(mut self, probe: Box<dyn Probe + Send>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn probe(&self) -> &dyn Probe {
        self.probe.as_ref()
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// How many scopes enclose the current point of compilation.
    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    /// Applies `overrides` until the returned [Scope] is dropped.
    pub fn scope(&mut self, overrides: &Overrides) -> Scope<'_> {
        let merged = self.context.merged(overrides);
        self.saved.push(std::mem::replace(&mut self.context, merged));
        Scope { session: self }
    }

    /// Runs `body` with `overrides` applied. The previous context is restored however `body` exits.
    pub fn with_scope<T>(
        &mut self,
        overrides: &Overrides,
        body: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let mut scope = self.scope(overrides);
        body(&mut scope)
    }

    /// Appends `fragment` to the remote script, joining the last segment if it runs the same way.
    pub fn emit(&mut self, fragment: Fragment) {
        if fragment.is_empty() {
            return;
        }
        debug!(label = fragment.label(), "emitting fragment");

        let mode = self.context.exec_mode;
        let user = &self.context.acting_user;
        if let Some(Step::Remote(segment)) = self.steps.last_mut() {
            if segment.accepts(mode, user) {
                segment.fragments.push(fragment);
                return;
            }
        }

        let mut segment = Segment::new(mode, user.clone());
        segment.fragments.push(fragment);
        self.steps.push(Step::Remote(segment));
    }

    /// Appends a fragment that runs on the controller.
    pub fn emit_local(&mut self, fragment: Fragment) {
        if fragment.is_empty() {
            return;
        }
        debug!(label = fragment.label(), "emitting local fragment");
        self.steps.push(Step::Local(fragment));
    }

    /// Copies `from` on the controller to `to` on the target.
    pub fn upload(&mut self, from: impl Into<PathBuf>, to: impl Into<String>) {
        self.steps.push(Step::Upload {
            from: from.into(),
            to: to.into(),
        });
    }

    pub fn set_flag(&mut self, flag: impl Into<String>) {
        self.flags.insert(flag.into());
    }

    pub fn flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Validates and compiles `action` into this session.
    pub fn run(&mut self, action: &Action) -> Result<()> {
        action.compile(self)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// All remote fragments emitted so far, in order.
    pub fn fragments(&self) -> Vec<&Fragment> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Remote(segment) => Some(segment.fragments.iter()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Compiles `actions` for `host`.
    ///
    /// Every action is validated before any is compiled, so a bad option anywhere produces an error
    /// and no script at all.
    pub fn compile(mut self, host: impl Into<String>, actions: &[Action]) -> Result<HostScript> {
        for action in actions {
            action.validate()?;
        }
        for action in actions {
            self.run(action)?;
        }
        Ok(self.finish(host))
    }

    /// Consumes the session and returns what it emitted.
    pub fn finish(self, host: impl Into<String>) -> HostScript {
        HostScript {
            host: host.into(),
            steps: self.steps,
        }
    }
}

/// A [Session] with overridden context. Dropping it restores the context it replaced.
pub struct Scope<'s> {
    session: &'s mut Session,
}

impl Deref for Scope<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.session.saved.pop() {
            self.session.context = context;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ExecMode;
    use crate::core::script::checked;
    use crate::Error;

    mod with_scope {
        use super::*;

        #[test]
        fn overrides_for_the_body_only() {
            let mut session = Session::default();
            session
                .with_scope(&Overrides::new().unprivileged(), |s| {
                    assert_eq!(ExecMode::Unprivileged, s.context().exec_mode);
                    Ok(())
                })
                .unwrap();
            assert_eq!(ExecMode::Privileged, session.context().exec_mode);
            assert_eq!(0, session.depth());
        }

        #[test]
        fn restores_on_failure() {
            let mut session = Session::default();
            let result: Result<()> = session.with_scope(&Overrides::new().user("alice"), |_| {
                Err(Error::UnknownKind("nope".into()))
            });
            assert!(result.is_err());
            assert_eq!("root", session.context().acting_user);
        }

        #[test]
        fn nests_last_in_first_out() {
            let mut session = Session::default();
            session
                .with_scope(&Overrides::new().user("a"), |s| {
                    s.with_scope(&Overrides::new().user("b"), |s| {
                        assert_eq!("b", s.context().acting_user);
                        assert_eq!(2, s.depth());
                        Ok(())
                    })?;
                    assert_eq!("a", s.context().acting_user);
                    Ok(())
                })
                .unwrap();
            assert_eq!("root", session.context().acting_user);
        }

        #[test]
        fn restores_on_panic() {
            let mut session = Session::default();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let _ = session.with_scope(&Overrides::new().user("alice"), |_| -> Result<()> {
                    panic!("boom")
                });
            }));
            assert!(result.is_err());
            assert_eq!("root", session.context().acting_user);
        }
    }

    mod emit {
        use super::*;

        #[test]
        fn groups_fragments_with_the_same_mode() {
            let mut session = Session::default();
            session.emit(checked("A", ["true"]));
            session.emit(checked("B", ["true"]));
            assert_eq!(1, session.steps().len());
            assert_eq!(2, session.fragments().len());
        }

        #[test]
        fn splits_on_mode_change() {
            let mut session = Session::default();
            session.emit(checked("A", ["true"]));
            session
                .with_scope(&Overrides::new().unprivileged(), |s| {
                    s.emit(checked("B", ["true"]));
                    Ok(())
                })
                .unwrap();
            session.emit(checked("C", ["true"]));
            assert_eq!(3, session.steps().len());
        }

        #[test]
        fn splits_around_uploads_and_local_steps() {
            let mut session = Session::default();
            session.emit(checked("A", ["true"]));
            session.upload("motd", "/tmp/motd");
            session.emit_local(checked("L", ["true"]));
            session.emit(checked("B", ["true"]));
            let steps = session.steps();
            assert_eq!(4, steps.len());
            assert!(matches!(steps[1], Step::Upload { .. }));
            assert!(matches!(steps[2], Step::Local(_)));
        }

        #[test]
        fn skips_empty_fragments() {
            let mut session = Session::default();
            session.emit(checked("Nothing", Vec::<String>::new()));
            assert!(session.steps().is_empty());
        }
    }

    #[test]
    fn flags() {
        let mut session = Session::default();
        assert!(!session.flag("restart-nginx"));
        session.set_flag("restart-nginx");
        assert!(session.flag("restart-nginx"));
    }
}
