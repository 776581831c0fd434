//! Lifecycle of one provider plugin.

use crate::catalog::{PluginDescriptor, ProviderKind};
use crate::launcher::{Binder, InjectedLauncher, ProviderLauncher};
use cadenza_core::{DspProvider, MusicProvider, ProviderIdentifier, RemoteResult};
use cadenza_plugin::DeathHandler;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;

#[cfg(unix)]
use cadenza_audio::{AudioSink, AudioSocketError, AudioSocketHost, HostOptions};
#[cfg(unix)]
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundState {
    Unbound,
    Binding,
    Bound,
}

impl fmt::Display for BoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BoundState::Unbound => "unbound",
            BoundState::Binding => "binding",
            BoundState::Bound => "bound",
        })
    }
}

/// Told when a connection finishes binding or stops being bound.
///
/// Called from the bind thread, the plugin's death handler or the thread
/// calling [`Connection::unbind`]; no connection lock is held.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self, connection: &Arc<Connection>);
    fn on_disconnected(&self, connection: &Arc<Connection>);
}

struct Link {
    state: BoundState,
    binder: Option<Binder>,
    /// Bumped on every bind and unbind so stale bind threads and death
    /// handlers can tell they are no longer current.
    generation: u64,
}

/// One provider plugin, bound or not.
///
/// Connections survive crashes: a dead remote drops back to
/// [`BoundState::Unbound`] and stays in the registry until the next
/// discovery pass re-binds it.
pub struct Connection {
    identifier: ProviderIdentifier,
    author: Option<String>,
    config_entry: Option<String>,
    kind: ProviderKind,
    launcher: Arc<dyn ProviderLauncher>,
    link: Mutex<Link>,
    audio_socket_name: Mutex<Option<String>>,
    #[cfg(unix)]
    audio_socket: Mutex<Option<AudioSocketHost>>,
    listeners: RwLock<Vec<Weak<dyn ConnectionListener>>>,
}

impl Connection {
    pub fn new(descriptor: &PluginDescriptor) -> Self {
        let identifier = ProviderIdentifier::new(
            descriptor.package.as_str(),
            descriptor.service.as_str(),
            descriptor.name.clone().unwrap_or_default(),
        );
        Self::with_launcher(
            identifier,
            descriptor.author.clone(),
            descriptor.config_entry.clone(),
            descriptor.kind,
            Arc::clone(&descriptor.launcher),
        )
    }

    /// Connection to an in-process provider.
    pub fn injected(identifier: ProviderIdentifier, author: Option<String>, binder: Binder) -> Self {
        let kind = match binder {
            Binder::Content(_) => ProviderKind::Content,
            Binder::Dsp(_) => ProviderKind::Dsp,
        };
        Self::with_launcher(
            identifier,
            author,
            None,
            kind,
            Arc::new(InjectedLauncher::new(binder)),
        )
    }

    fn with_launcher(
        identifier: ProviderIdentifier,
        author: Option<String>,
        config_entry: Option<String>,
        kind: ProviderKind,
        launcher: Arc<dyn ProviderLauncher>,
    ) -> Self {
        Self {
            identifier,
            author,
            config_entry,
            kind,
            launcher,
            link: Mutex::new(Link {
                state: BoundState::Unbound,
                binder: None,
                generation: 0,
            }),
            audio_socket_name: Mutex::new(None),
            #[cfg(unix)]
            audio_socket: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn identifier(&self) -> &ProviderIdentifier {
        &self.identifier
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn config_entry(&self) -> Option<&str> {
        self.config_entry.as_deref()
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn state(&self) -> BoundState {
        self.link.lock().state
    }

    pub fn is_bound(&self) -> bool {
        self.state() == BoundState::Bound
    }

    /// Content call surface, when bound.
    pub fn provider(&self) -> Option<Arc<dyn MusicProvider>> {
        match &self.link.lock().binder {
            Some(Binder::Content(provider)) => Some(Arc::clone(provider)),
            _ => None,
        }
    }

    /// DSP call surface, when bound.
    pub fn dsp(&self) -> Option<Arc<dyn DspProvider>> {
        match &self.link.lock().binder {
            Some(Binder::Dsp(provider)) => Some(Arc::clone(provider)),
            _ => None,
        }
    }

    pub fn add_listener(&self, listener: Weak<dyn ConnectionListener>) {
        self.listeners.write().push(listener);
    }

    /// Starts binding on a background thread. No-op unless unbound.
    ///
    /// Completion is reported through [`ConnectionListener::on_connected`].
    /// A failed launch leaves the connection unbound and is not retried.
    pub fn bind(self: &Arc<Self>) {
        let generation = {
            let mut link = self.link.lock();
            if link.state != BoundState::Unbound {
                return;
            }
            link.state = BoundState::Binding;
            link.generation += 1;
            link.generation
        };
        tracing::debug!(provider = %self.identifier, "binding provider");

        let this = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("bind-{}", self.identifier.service))
            .spawn(move || this.complete_bind(generation));
        if let Err(err) = spawned {
            tracing::error!(provider = %self.identifier, error = %err, "failed to spawn bind thread");
            self.abandon_bind(generation);
        }
    }

    fn complete_bind(self: Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(&self);
        let on_death: DeathHandler = Box::new(move || {
            if let Some(connection) = weak.upgrade() {
                connection.on_remote_died(generation);
            }
        });

        let binder = match self.launcher.launch(on_death) {
            Ok(binder) => binder,
            Err(err) => {
                tracing::warn!(provider = %self.identifier, error = %err, "provider failed to bind");
                self.abandon_bind(generation);
                return;
            }
        };

        if let Err(err) = self.initialize_remote(&binder) {
            tracing::warn!(provider = %self.identifier, error = %err, "provider rejected initialization");
            binder.shutdown();
            self.abandon_bind(generation);
            return;
        }

        {
            let mut link = self.link.lock();
            if link.generation != generation || link.state != BoundState::Binding {
                drop(link);
                tracing::debug!(provider = %self.identifier, "bind superseded, shutting down remote");
                binder.shutdown();
                return;
            }
            link.state = BoundState::Bound;
            link.binder = Some(binder);
        }
        tracing::info!(provider = %self.identifier, kind = %self.kind, "provider bound");
        self.notify(|listener, connection| listener.on_connected(connection));
    }

    /// Tells a freshly bound remote who it is and where its audio goes.
    fn initialize_remote(&self, binder: &Binder) -> RemoteResult<()> {
        let socket_name = self.audio_socket_name.lock().clone();
        match binder {
            Binder::Content(provider) => {
                provider.set_identifier(&self.identifier)?;
                if let Some(name) = socket_name {
                    provider.set_audio_socket_name(&name)?;
                }
            }
            Binder::Dsp(provider) => {
                provider.set_identifier(&self.identifier)?;
                if let Some(name) = socket_name {
                    provider.set_audio_socket_name(&name)?;
                }
            }
        }
        Ok(())
    }

    fn abandon_bind(&self, generation: u64) {
        let mut link = self.link.lock();
        if link.generation == generation && link.state == BoundState::Binding {
            link.state = BoundState::Unbound;
        }
    }

    fn on_remote_died(self: &Arc<Self>, generation: u64) {
        let was_bound = {
            let mut link = self.link.lock();
            if link.generation != generation || link.state == BoundState::Unbound {
                return;
            }
            let was_bound = link.state == BoundState::Bound;
            link.state = BoundState::Unbound;
            link.binder = None;
            was_bound
        };
        tracing::warn!(provider = %self.identifier, "provider process died");
        if was_bound {
            self.notify(|listener, connection| listener.on_disconnected(connection));
        }
    }

    /// Drops a remote that failed a call but never exited. Like a crash, the
    /// connection goes back to unbound and keeps its audio socket.
    pub fn remote_failed(self: &Arc<Self>) {
        let binder = {
            let mut link = self.link.lock();
            if link.state != BoundState::Bound {
                return;
            }
            link.state = BoundState::Unbound;
            link.generation += 1;
            link.binder.take()
        };
        tracing::warn!(provider = %self.identifier, "provider stopped answering");
        self.notify(|listener, connection| listener.on_disconnected(connection));
        if let Some(binder) = binder {
            binder.shutdown();
        }
    }

    /// Releases the audio socket, then tears down the remote.
    pub fn unbind(self: &Arc<Self>) {
        #[cfg(unix)]
        self.release_audio_socket();

        let binder = {
            let mut link = self.link.lock();
            if link.state == BoundState::Unbound {
                return;
            }
            link.state = BoundState::Unbound;
            link.generation += 1;
            link.binder.take()
        };
        if let Some(binder) = binder {
            self.notify(|listener, connection| listener.on_disconnected(connection));
            binder.shutdown();
            tracing::info!(provider = %self.identifier, "provider unbound");
        } else {
            tracing::debug!(provider = %self.identifier, "bind cancelled");
        }
    }

    pub fn audio_socket_name(&self) -> Option<String> {
        self.audio_socket_name.lock().clone()
    }

    /// Records where this provider's audio goes and tells the remote if it
    /// is bound. The name is re-sent on every bind.
    pub fn set_audio_socket_name(&self, name: impl Into<String>) {
        let name = name.into();
        *self.audio_socket_name.lock() = Some(name.clone());

        let binder = self.link.lock().binder.clone();
        let result = match binder {
            Some(Binder::Content(provider)) => Some(provider.set_audio_socket_name(&name)),
            Some(Binder::Dsp(provider)) => Some(provider.set_audio_socket_name(&name)),
            None => None,
        };
        if let Some(Err(err)) = result {
            tracing::warn!(provider = %self.identifier, socket = %name, error = %err, "failed to send audio socket name");
        }
    }

    /// Opens this provider's audio socket, releasing any previous one first.
    #[cfg(unix)]
    pub fn create_audio_socket(
        &self,
        socket_dir: &Path,
        sink: Box<dyn AudioSink>,
        options: HostOptions,
    ) -> Result<String, AudioSocketError> {
        self.release_audio_socket();
        let name = socket_name_for(&self.identifier);
        let host = AudioSocketHost::new(name.as_str(), socket_dir, sink, options);
        host.start_listening()?;
        *self.audio_socket.lock() = Some(host);
        self.set_audio_socket_name(name.as_str());
        Ok(name)
    }

    #[cfg(unix)]
    pub fn audio_socket_path(&self) -> Option<PathBuf> {
        self.audio_socket
            .lock()
            .as_ref()
            .map(|host| host.path().to_path_buf())
    }

    #[cfg(unix)]
    fn release_audio_socket(&self) {
        let host = self.audio_socket.lock().take();
        if let Some(host) = host {
            host.release();
        }
    }

    fn notify(self: &Arc<Self>, call: impl Fn(&dyn ConnectionListener, &Arc<Connection>)) {
        let listeners: Vec<_> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in listeners {
            call(listener.as_ref(), self);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("identifier", &self.identifier)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("audio_socket_name", &self.audio_socket_name())
            .finish_non_exhaustive()
    }
}

/// Socket name of a provider's audio edge, safe to use as a file name.
pub fn socket_name_for(identifier: &ProviderIdentifier) -> String {
    format!("{}_{}", identifier.package, identifier.service)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_names_are_file_safe() {
        let id = ProviderIdentifier::new("org.example", "Local Files/1", "Files");
        assert_eq!(socket_name_for(&id), "org.example_Local_Files_1");
    }
}
