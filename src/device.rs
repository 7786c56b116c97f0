//! The device facade: outbound call plumbing, inbound delivery, command
//! handles, heartbeat and timeouts.

use std::{
    collections::HashMap,
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{
    dispatch::Dispatcher,
    event_key, introspect,
    packet::{self, BODY_OFFSET},
    registry::strip_com,
    ByteRange, Continuation, Error, FrameParser, MacAddress, Method, NamespaceContribution,
    NamespaceIdTable, NamespaceRegistry, Packet, PacketAssembler, Reply, Transport, Value,
    Watcher,
};
use crate::registry::BodyBuilder;

/// A callback resolving a multi-step operation such as
/// [`Device::connect`].
pub type DoneCallback = Box<dyn FnOnce(&mut Device, Result<(), Error>)>;

/// Options controlling connect-time behaviour.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    /// Discover the device's namespaces during connect.
    pub introspect_namespaces: bool,

    /// Discover each namespace's RPC catalog during connect. Requires the
    /// device to advertise `bcs.rpc`.
    pub introspect_rpcs: bool,

    /// Period of the `bcs.core._png` heartbeat; `None` disables it.
    pub heartbeat_ms: Option<u32>,

    /// Deadline applied to every correlated call.
    pub request_timeout_ms: u32,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            introspect_namespaces: true,
            introspect_rpcs: false,
            heartbeat_ms: Some(3000),
            request_timeout_ms: 2000,
        }
    }
}

/// Construct a device over `transport`.
///
/// The registry starts with the `bcs.core` and `bcs.rpc` contributions
/// loaded; add further ones with [`Device::supports_namespace`].
pub fn new_device(transport: impl Transport + 'static, options: DeviceOptions) -> Device {
    Device::new(Box::new(transport), options)
}

#[derive(Debug)]
struct Heartbeat {
    period: Duration,
    last: Instant,
}

#[derive(Clone)]
struct CachedResolution {
    generation: u64,
    send: Method,
    recv: Method,
    arity: usize,
    builder: BodyBuilder,
}

/// One Bowler device on the far side of a transport.
///
/// The device is single-threaded and cooperative: the owning task feeds
/// inbound bytes through [`on_raw_chunk`](Device::on_raw_chunk), drives
/// time through [`tick`](Device::tick), and issues calls whose
/// continuations run on the same task.
pub struct Device {
    transport: Box<dyn Transport>,
    registry: NamespaceRegistry,
    ids: NamespaceIdTable,
    framer: FrameParser,
    dispatcher: Dispatcher,
    options: DeviceOptions,
    mac: MacAddress,
    heartbeat: Option<Heartbeat>,
    closed: bool,
    pub(crate) introspection_active: bool,
    resolutions: HashMap<(String, String, Option<Method>), CachedResolution>,
}

impl Device {
    fn new(transport: Box<dyn Transport>, options: DeviceOptions) -> Self {
        let mut registry = NamespaceRegistry::new();
        registry.import_namespace(crate::namespaces::core::contribution());
        registry.import_namespace(crate::namespaces::rpc::contribution());

        Self {
            transport,
            registry,
            ids: NamespaceIdTable::new(),
            framer: FrameParser::new(),
            dispatcher: Dispatcher::new(),
            options,
            mac: MacAddress::BROADCAST,
            heartbeat: None,
            closed: false,
            introspection_active: false,
            resolutions: HashMap::new(),
        }
    }

    /// The MAC address outbound packets are addressed to.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// Address outbound packets to `mac` instead of broadcast.
    pub fn set_mac(&mut self, mac: MacAddress) {
        self.mac = mac;
    }

    /// The namespace registry.
    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut NamespaceRegistry {
        &mut self.registry
    }

    /// The namespace id table.
    pub fn namespace_ids(&self) -> &NamespaceIdTable {
        &self.ids
    }

    pub(crate) fn ids_mut(&mut self) -> &mut NamespaceIdTable {
        &mut self.ids
    }

    /// Whether the transport has failed; a closed device rejects every
    /// call.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Merge a statically-provided namespace contribution into the
    /// registry.
    pub fn supports_namespace(&mut self, contribution: NamespaceContribution) {
        self.registry.import_namespace(contribution);
    }

    /// Record a namespace id learned out of band (hosts that skip
    /// namespace introspection seed the table themselves).
    pub fn register_namespace_id(&mut self, id: u8, name: &str) {
        self.ids.insert(id, name);
    }

    /// Attach a persistent watcher to an event key (see [`event_key`]).
    ///
    /// Watchers observe every decoded packet for their key, including
    /// `async` pushes no call is waiting on.
    pub fn on(&mut self, key: &str, watcher: Watcher) {
        self.dispatcher.watch(key.to_owned(), watcher);
    }

    /// Remove every pending listener for an event key, returning how many
    /// were dropped. A reply arriving for a cancelled call is discarded
    /// as spurious.
    pub fn cancel(&mut self, key: &str) -> usize {
        self.dispatcher.cancel(key)
    }

    /// The root command handle; navigate it by namespace segment to reach
    /// callable RPCs.
    pub fn command_to(&self) -> CommandHandle {
        CommandHandle::default()
    }

    /// Open the transport, run the configured introspection passes, arm
    /// the heartbeat, resync device state and invoke `done`.
    pub fn connect(&mut self, done: DoneCallback) {
        if let Err(e) = self.transport.open() {
            done(self, Err(e));
            return;
        }

        let introspect_rpcs = self.options.introspect_rpcs;
        let after_namespaces: DoneCallback = Box::new(move |dev, res| match res {
            Err(e) => done(dev, Err(e)),
            Ok(()) => {
                if introspect_rpcs {
                    introspect::run_rpcs(
                        dev,
                        Box::new(move |dev, res| match res {
                            Err(e) => done(dev, Err(e)),
                            Ok(()) => Self::finish_connect(dev, done),
                        }),
                    );
                } else {
                    Self::finish_connect(dev, done);
                }
            }
        });

        if self.options.introspect_namespaces {
            introspect::run_namespaces(self, after_namespaces);
        } else {
            after_namespaces(self, Ok(()));
        }
    }

    fn finish_connect(dev: &mut Self, done: DoneCallback) {
        if let Some(ms) = dev.options.heartbeat_ms {
            dev.heartbeat = Some(Heartbeat {
                period: Duration::from_millis(u64::from(ms)),
                last: Instant::now(),
            });
        }
        Self::resync_step(dev, 0, done);
    }

    /// The state queried after connect: power, revision, info. Entries
    /// the device or registry do not know are skipped.
    const RESYNC: &'static [(&'static str, &'static str)] = &[
        ("neuronrobotics.dyio", "_pwr"),
        ("neuronrobotics.dyio", "_rev"),
        ("neuronrobotics.dyio", "info"),
    ];

    fn resync_step(dev: &mut Self, i: usize, done: DoneCallback) {
        let Some(&(namespace, rpc)) = Self::RESYNC.get(i) else {
            done(dev, Ok(()));
            return;
        };

        let known = dev.registry.rpc(namespace, rpc).is_ok() && dev.ids.id_of(namespace).is_some();
        if !known {
            debug!("resync: skipping {namespace}#{rpc}");
            Self::resync_step(dev, i + 1, done);
            return;
        }

        dev.call(
            namespace,
            rpc,
            Some(Method::Get),
            &[],
            Box::new(move |dev, res| {
                if let Err(e) = res {
                    if e == Error::TransportClosed {
                        done(dev, Err(e));
                        return;
                    }
                    debug!("resync: {rpc}: {e}");
                }
                Self::resync_step(dev, i + 1, done);
            }),
        );
    }

    /// Run namespace discovery outside of connect.
    pub fn introspect_namespaces(&mut self, done: DoneCallback) {
        introspect::run_namespaces(self, done);
    }

    /// Run RPC discovery outside of connect.
    pub fn introspect_rpcs(&mut self, done: DoneCallback) {
        introspect::run_rpcs(self, done);
    }

    fn resolve(
        &mut self,
        namespace: &str,
        rpc: &str,
        method: Option<Method>,
    ) -> Result<CachedResolution, Error> {
        let generation = self.registry.generation();
        let key = (namespace.to_owned(), rpc.to_owned(), method);
        if let Some(hit) = self.resolutions.get(&key) {
            if hit.generation == generation {
                return Ok(hit.clone());
            }
        }

        let entry = self.registry.rpc(namespace, rpc)?;
        let send = match method {
            Some(m) => m,
            None => entry
                .default_method()
                .ok_or_else(|| Error::EmptyRpcEntry(rpc.to_owned()))?,
        };
        let bound = entry.entry_for(send).ok_or_else(|| Error::UnsupportedMethod {
            rpc: rpc.to_owned(),
            method: send,
        })?;

        let resolved = CachedResolution {
            generation,
            send,
            recv: bound.recv(),
            arity: bound.arity(),
            builder: Rc::clone(bound.builder()),
        };
        self.resolutions.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Build the outbound bytes and the response event key for one call.
    fn prepare(
        &mut self,
        namespace: &str,
        rpc: &str,
        method: Option<Method>,
        args: &[Value],
    ) -> Result<(Vec<u8>, String), Error> {
        if self.closed {
            return Err(Error::TransportClosed);
        }

        let resolved = self.resolve(namespace, rpc, method)?;
        if args.len() != resolved.arity {
            return Err(Error::ArityMismatch {
                rpc: rpc.to_owned(),
                wanted: resolved.arity,
                got: args.len(),
            });
        }

        let id = self
            .ids
            .id_of(namespace)
            .ok_or_else(|| Error::UndefinedNamespace(namespace.to_owned()))?;

        let mut body = PacketAssembler::with_offset(BODY_OFFSET);
        (resolved.builder)(&mut body, args)?;

        let bytes = packet::assemble(self.mac, resolved.send, id, rpc, &body)?;
        let key = event_key(resolved.recv, strip_com(namespace), rpc);
        Ok((bytes, key))
    }

    /// Send one RPC request without listening for its response.
    ///
    /// A write failure closes the device and fails every outstanding
    /// call.
    pub fn send_datagram(
        &mut self,
        namespace: &str,
        rpc: &str,
        method: Option<Method>,
        args: &[Value],
    ) -> Result<(), Error> {
        let (bytes, _) = self.prepare(namespace, rpc, method, args)?;
        self.write(&bytes)
    }

    /// Send one RPC request and resolve `continuation` with its response.
    ///
    /// The listener is registered before the bytes are written, so a
    /// reply cannot race the registration. Every error - resolution,
    /// build, write, timeout - reaches the continuation exactly once;
    /// `call` itself never reports one.
    pub fn call(
        &mut self,
        namespace: &str,
        rpc: &str,
        method: Option<Method>,
        args: &[Value],
        continuation: Continuation,
    ) {
        match self.prepare(namespace, rpc, method, args) {
            Err(e) => continuation(self, Err(e)),
            Ok((bytes, key)) => {
                let deadline =
                    Instant::now() + Duration::from_millis(u64::from(self.options.request_timeout_ms));
                self.dispatcher.register(key, continuation, deadline);
                // A failed write fails every listener, this call's
                // included.
                let _ = self.write(&bytes);
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        match self.transport.write(bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("transport write failed: {e}");
                self.shutdown();
                Err(Error::TransportClosed)
            }
        }
    }

    fn shutdown(&mut self) {
        self.closed = true;
        self.heartbeat = None;
        for continuation in self.dispatcher.drain_all() {
            continuation(self, Err(Error::TransportClosed));
        }
    }

    /// Surface a fatal transport error: fails every outstanding call and
    /// closes the device.
    pub fn on_transport_error(&mut self, error: Error) {
        warn!("transport error: {error}");
        self.shutdown();
    }

    /// Feed a raw inbound chunk from the transport.
    ///
    /// Complete packets are parsed, decoded through the registry and
    /// fired at their event key; listeners' continuations run before this
    /// method returns.
    pub fn on_raw_chunk(&mut self, chunk: &[u8]) {
        for frame in self.framer.push(chunk) {
            match Packet::parse(&frame, &self.ids) {
                Ok(p) => self.deliver(p),
                // A corrupt packet is dropped; the stream stays in sync
                // because the frame length was already consistent.
                Err(e) => warn!("dropping inbound packet: {e}"),
            }
        }
    }

    fn deliver(&mut self, p: Packet) {
        let key = event_key(p.method(), p.namespace(), p.rpc());

        let parser = match self.registry.rpc(p.namespace(), p.rpc()) {
            Ok(entry) => match entry
                .entry_for_recv(p.method())
                .map(|(_, bound)| bound)
                .or_else(|| entry.entry_for(p.method()))
            {
                Some(bound) => Rc::clone(bound.parser()),
                None => {
                    warn!("no binding answers {key}, discarding");
                    return;
                }
            },
            Err(e) => {
                warn!("unroutable inbound packet {key}: {e}");
                return;
            }
        };

        match parser(ByteRange::of(p.body())) {
            Ok(values) => {
                let reply = Reply::new(values, p.method(), p.namespace(), p.rpc());
                self.dispatcher.notify_watchers(&key, &reply);
                if let Some(continuation) = self.dispatcher.take_next(&key) {
                    continuation(self, Ok(reply));
                } else if !self.dispatcher.has_watchers(&key) {
                    warn!("spurious reply {key} discarded");
                }
            }
            // The reply was for this call; its listener gets the decode
            // error.
            Err(e) => {
                if let Some(continuation) = self.dispatcher.take_next(&key) {
                    continuation(self, Err(e));
                } else {
                    warn!("undecodable reply {key}: {e}");
                }
            }
        }
    }

    /// Drive time: fail calls whose deadline passed and send the
    /// heartbeat when due. Call once per scheduler tick.
    pub fn tick(&mut self, now: Instant) {
        for (key, continuation) in self.dispatcher.take_expired(now) {
            continuation(self, Err(Error::Timeout { key }));
        }

        if self.closed {
            return;
        }

        let heartbeat_due = self.heartbeat.as_mut().is_some_and(|hb| {
            if now.duration_since(hb.last) >= hb.period {
                hb.last = now;
                true
            } else {
                false
            }
        });
        if heartbeat_due {
            self.call(
                "bcs.core",
                "_png",
                Some(Method::Get),
                &[],
                Box::new(|_, res| {
                    if let Err(e) = res {
                        debug!("heartbeat: {e}");
                    }
                }),
            );
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("transport", &self.transport)
            .field("mac", &self.mac)
            .field("namespace_ids", &self.ids)
            .field("dispatcher", &self.dispatcher)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// A navigable handle over namespace segments.
///
/// Handles are cheap paths; resolution against the registry happens at
/// call time through a generation-stamped cache, so handles stay valid
/// across introspection (which rebuilds the cache by bumping the registry
/// generation).
#[derive(Debug, Clone, Default)]
pub struct CommandHandle {
    path: String,
}

impl CommandHandle {
    /// Descend one namespace segment.
    pub fn seg(mut self, segment: &str) -> Self {
        if !self.path.is_empty() {
            self.path.push('.');
        }
        self.path.push_str(segment);
        self
    }

    /// Descend a dotted path of segments.
    pub fn at(self, dotted: &str) -> Self {
        dotted.split('.').fold(self, |h, s| h.seg(s))
    }

    /// The RPC `name` under this namespace.
    pub fn rpc(self, name: &str) -> RpcHandle {
        RpcHandle {
            namespace: self.path,
            rpc: name.to_owned(),
            method: None,
        }
    }
}

/// A callable RPC handle.
///
/// A multi-method RPC is disambiguated with [`method`](RpcHandle::method);
/// without it the entry's default send method applies.
#[derive(Debug, Clone)]
pub struct RpcHandle {
    namespace: String,
    rpc: String,
    method: Option<Method>,
}

impl RpcHandle {
    /// Pin this handle to one send method.
    pub fn method(mut self, m: Method) -> Self {
        self.method = Some(m);
        self
    }

    /// Call now, resolving `continuation` with the response.
    pub fn invoke(&self, device: &mut Device, args: Vec<Value>, continuation: Continuation) {
        device.call(&self.namespace, &self.rpc, self.method, &args, continuation);
    }

    /// Call now without listening for a response.
    pub fn send(&self, device: &mut Device, args: Vec<Value>) -> Result<(), Error> {
        device.send_datagram(&self.namespace, &self.rpc, self.method, &args)
    }

    /// Capture the arguments now and send later; the listener is
    /// registered when the deferred call is sent.
    pub fn prepare(&self, args: Vec<Value>) -> PreparedCall {
        PreparedCall {
            namespace: self.namespace.clone(),
            rpc: self.rpc.clone(),
            method: self.method,
            args,
        }
    }
}

/// A deferred call: arguments captured, not yet sent.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    namespace: String,
    rpc: String,
    method: Option<Method>,
    args: Vec<Value>,
}

impl PreparedCall {
    /// Send the captured call, resolving `continuation` with the
    /// response.
    pub fn send(self, device: &mut Device, continuation: Continuation) {
        device.call(&self.namespace, &self.rpc, self.method, &self.args, continuation);
    }
}
