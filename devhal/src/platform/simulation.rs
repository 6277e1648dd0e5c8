//! Simulated platforms.
//!
//! Programmable in-memory hosts used by the test-suite and by
//! `devhal --simulate`. Every knob the reconnection logic depends on is
//! exposed: capability support, granted and revoked permissions, the
//! user's answer to the next prompt, open failures and device behavior.

use crate::drivers::serial::{SerialPlatform, SerialPortInfo};
use crate::drivers::storage::{StorageDirectory, StoragePlatform, StorageRoot};
use crate::drivers::usb::{UsbDeviceInfo, UsbPlatform};
use crate::drivers::wakelock::{WakeLockPlatform, WakeLockSentinel};
use crate::stream::BoxedStream;
use async_trait::async_trait;
use devhal_common::hal::driver::HalError;
use devhal_common::hal::types::{DeviceFilter, DirEntry, EntryKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

const SIM_PIPE_CAPACITY: usize = 4096;

/// Scripted answer to the next acquisition prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimPromptResponse {
    /// Pick the resource with this id
    Select(String),
    /// Pick the first offered resource
    SelectFirst,
    /// Dismiss the chooser
    Cancel,
    /// Refuse access
    Deny,
}

/// What a simulated device does once its inbound bytes are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimBehavior {
    /// Echo every write back
    Loopback,
    /// Stay open and send nothing
    Silent,
    /// Close the stream
    Hangup,
}

/// A simulated serial or USB device.
#[derive(Debug, Clone)]
pub struct SimDevice {
    /// Platform id (port path or bus path)
    pub id: String,
    /// Vendor id
    pub vendor_id: u16,
    /// Product id
    pub product_id: u16,
    /// Serial number
    pub serial_number: Option<String>,
    /// Product description
    pub label: String,
    /// Bytes the device sends right after open
    pub inbound: Vec<u8>,
    /// Behavior after `inbound`
    pub behavior: SimBehavior,
}

impl SimDevice {
    /// Silent device.
    pub fn new(id: &str, vendor_id: u16, product_id: u16) -> Self {
        Self {
            id: id.to_string(),
            vendor_id,
            product_id,
            serial_number: None,
            label: "Simulated device".to_string(),
            inbound: Vec::new(),
            behavior: SimBehavior::Silent,
        }
    }

    /// Set the serial number.
    pub fn with_serial_number(mut self, serial: &str) -> Self {
        self.serial_number = Some(serial.to_string());
        self
    }

    /// Set the product description.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Bytes sent right after open.
    pub fn with_inbound(mut self, bytes: &[u8]) -> Self {
        self.inbound = bytes.to_vec();
        self
    }

    /// Behavior after the inbound bytes.
    pub fn with_behavior(mut self, behavior: SimBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn port_info(&self) -> SerialPortInfo {
        SerialPortInfo {
            id: self.id.clone(),
            vendor_id: Some(self.vendor_id),
            product_id: Some(self.product_id),
            description: Some(self.label.clone()),
        }
    }

    fn usb_info(&self) -> UsbDeviceInfo {
        UsbDeviceInfo {
            id: self.id.clone(),
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_number: self.serial_number.clone(),
            product_name: Some(self.label.clone()),
        }
    }

    fn passes(&self, filters: &[DeviceFilter]) -> bool {
        filters.is_empty()
            || filters
                .iter()
                .any(|f| f.matches(Some(self.vendor_id), Some(self.product_id)))
    }
}

/// Pick from `candidates` the way the scripted prompt answers.
fn scripted_choice<T>(
    response: &SimPromptResponse,
    candidates: Vec<T>,
    id_of: impl Fn(&T) -> &str,
) -> Result<T, HalError> {
    match response {
        SimPromptResponse::Deny => Err(HalError::PermissionDenied(
            "user refused access".to_string(),
        )),
        SimPromptResponse::Cancel => Err(HalError::NoDeviceAvailable(
            "chooser dismissed".to_string(),
        )),
        SimPromptResponse::SelectFirst => candidates
            .into_iter()
            .next()
            .ok_or_else(|| HalError::NoDeviceAvailable("no device present".to_string())),
        SimPromptResponse::Select(id) => candidates
            .into_iter()
            .find(|c| id_of(c) == id.as_str())
            .ok_or_else(|| HalError::NoDeviceAvailable(format!("{id} not offered"))),
    }
}

// ─── Serial / USB ───────────────────────────────────────────────────

struct DeviceState {
    supported: bool,
    devices: Vec<SimDevice>,
    granted: HashSet<String>,
    revoked: HashSet<String>,
    prompt: SimPromptResponse,
    prompts: usize,
    opens: usize,
    fail_open: bool,
    last_open_param: Option<u32>,
    peers: HashMap<String, DuplexStream>,
}

/// Simulated serial or USB bus.
pub struct SimDevices {
    state: Mutex<DeviceState>,
}

impl Default for SimDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevices {
    /// Supported bus with no devices. Prompts pick the first candidate.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState {
                supported: true,
                devices: Vec::new(),
                granted: HashSet::new(),
                revoked: HashSet::new(),
                prompt: SimPromptResponse::SelectFirst,
                prompts: 0,
                opens: 0,
                fail_open: false,
                last_open_param: None,
                peers: HashMap::new(),
            }),
        }
    }

    /// A granted Arduino Uno echoing writes.
    pub fn demo_serial() -> Self {
        let sim = Self::new();
        sim.add_device(
            SimDevice::new("/dev/ttySIM0", 0x2341, 0x0043)
                .with_label("Arduino Uno")
                .with_behavior(SimBehavior::Loopback),
        );
        sim.grant("/dev/ttySIM0");
        sim
    }

    /// A granted USB probe echoing writes.
    pub fn demo_usb() -> Self {
        let sim = Self::new();
        sim.add_device(
            SimDevice::new("usb-1-1", 0x1209, 0x0001)
                .with_serial_number("SIM0001")
                .with_label("Simulated probe")
                .with_behavior(SimBehavior::Loopback),
        );
        sim.grant("usb-1-1");
        sim
    }

    /// Plug in a device.
    pub fn add_device(&self, device: SimDevice) {
        self.state.lock().devices.push(device);
    }

    /// Unplug a device. Its grant survives, as on real hosts.
    pub fn remove_device(&self, id: &str) {
        let mut state = self.state.lock();
        state.devices.retain(|d| d.id != id);
        state.peers.remove(id);
    }

    /// Grant access to a device without prompting.
    pub fn grant(&self, id: &str) {
        let mut state = self.state.lock();
        state.granted.insert(id.to_string());
        state.revoked.remove(id);
    }

    /// Revoke access out-of-band. The device stays listed as granted but
    /// fails the permission check.
    pub fn revoke(&self, id: &str) {
        self.state.lock().revoked.insert(id.to_string());
    }

    /// Script the answer to subsequent prompts.
    pub fn set_prompt(&self, response: SimPromptResponse) {
        self.state.lock().prompt = response;
    }

    /// Toggle capability support.
    pub fn set_supported(&self, supported: bool) {
        self.state.lock().supported = supported;
    }

    /// Make every open fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Number of prompts shown.
    pub fn prompt_count(&self) -> usize {
        self.state.lock().prompts
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Baud rate (serial) or interface (USB) of the last open.
    pub fn last_open_param(&self) -> Option<u32> {
        self.state.lock().last_open_param
    }

    /// Device end of the last stream opened on a silent device.
    /// Dropping it hangs the stream up.
    pub fn take_peer(&self, id: &str) -> Option<DuplexStream> {
        self.state.lock().peers.remove(id)
    }

    fn authorized(&self) -> Vec<SimDevice> {
        let state = self.state.lock();
        if !state.supported {
            return Vec::new();
        }
        state
            .devices
            .iter()
            .filter(|d| state.granted.contains(&d.id))
            .cloned()
            .collect()
    }

    fn permitted(&self, id: &str) -> bool {
        let state = self.state.lock();
        state.devices.iter().any(|d| d.id == id)
            && state.granted.contains(id)
            && !state.revoked.contains(id)
    }

    fn choose(&self, filters: &[DeviceFilter]) -> Result<SimDevice, HalError> {
        let mut state = self.state.lock();
        state.prompts += 1;
        let candidates: Vec<SimDevice> = state
            .devices
            .iter()
            .filter(|d| d.passes(filters))
            .cloned()
            .collect();
        let chosen = scripted_choice(&state.prompt, candidates, |d| d.id.as_str())?;
        state.granted.insert(chosen.id.clone());
        state.revoked.remove(&chosen.id);
        debug!("Simulated prompt granted {}", chosen.id);
        Ok(chosen)
    }

    async fn open_device(&self, id: &str, param: u32) -> Result<BoxedStream, HalError> {
        let device = {
            let mut state = self.state.lock();
            if state.fail_open {
                return Err(HalError::CommunicationError(format!("{id} is busy")));
            }
            let device = state
                .devices
                .iter()
                .find(|d| d.id == id)
                .cloned()
                .ok_or_else(|| HalError::NoDeviceAvailable(format!("{id} unplugged")))?;
            if !state.granted.contains(id) || state.revoked.contains(id) {
                return Err(HalError::PermissionDenied(id.to_string()));
            }
            state.opens += 1;
            state.last_open_param = Some(param);
            device
        };

        let (ours, mut theirs) = tokio::io::duplex(SIM_PIPE_CAPACITY);
        if !device.inbound.is_empty() {
            theirs
                .write_all(&device.inbound)
                .await
                .map_err(|e| HalError::CommunicationError(e.to_string()))?;
        }

        match device.behavior {
            SimBehavior::Loopback => {
                tokio::spawn(echo(theirs));
            }
            SimBehavior::Silent => {
                self.state.lock().peers.insert(device.id, theirs);
            }
            SimBehavior::Hangup => drop(theirs),
        }

        Ok(Box::new(ours))
    }
}

async fn echo(mut peer: DuplexStream) {
    let mut buf = [0u8; 1024];
    loop {
        match peer.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if peer.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl SerialPlatform for SimDevices {
    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    async fn granted_ports(&self) -> Result<Vec<SerialPortInfo>, HalError> {
        Ok(self.authorized().iter().map(SimDevice::port_info).collect())
    }

    async fn has_permission(&self, port: &SerialPortInfo) -> bool {
        self.permitted(&port.id)
    }

    async fn request_port(&self, filters: &[DeviceFilter]) -> Result<SerialPortInfo, HalError> {
        self.choose(filters).map(|d| d.port_info())
    }

    async fn open(&self, port: &SerialPortInfo, baud_rate: u32) -> Result<BoxedStream, HalError> {
        self.open_device(&port.id, baud_rate).await
    }
}

#[async_trait]
impl UsbPlatform for SimDevices {
    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    async fn granted_devices(&self) -> Result<Vec<UsbDeviceInfo>, HalError> {
        Ok(self.authorized().iter().map(SimDevice::usb_info).collect())
    }

    async fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        self.permitted(&device.id)
    }

    async fn request_device(&self, filters: &[DeviceFilter]) -> Result<UsbDeviceInfo, HalError> {
        self.choose(filters).map(|d| d.usb_info())
    }

    async fn open(&self, device: &UsbDeviceInfo, interface: u8) -> Result<BoxedStream, HalError> {
        self.open_device(&device.id, u32::from(interface)).await
    }
}

// ─── Storage ────────────────────────────────────────────────────────

/// Directory contents: `None` marks a subdirectory.
type SimTree = Arc<Mutex<BTreeMap<String, Option<Vec<u8>>>>>;

struct SimDir {
    root: StorageRoot,
    tree: SimTree,
}

struct StorageState {
    supported: bool,
    dirs: Vec<SimDir>,
    granted: HashSet<String>,
    revoked: HashSet<String>,
    read_only: HashSet<String>,
    prompt: SimPromptResponse,
    prompts: usize,
}

/// Simulated directory picker and file system.
pub struct SimStorage {
    state: Mutex<StorageState>,
}

impl Default for SimStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl SimStorage {
    /// Supported host with no directories.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StorageState {
                supported: true,
                dirs: Vec::new(),
                granted: HashSet::new(),
                revoked: HashSet::new(),
                read_only: HashSet::new(),
                prompt: SimPromptResponse::SelectFirst,
                prompts: 0,
            }),
        }
    }

    /// A granted "Documents" directory holding one file.
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.add_dir("sim-documents", "Documents");
        sim.put_file("sim-documents", "readme.txt", b"simulated storage\n");
        sim.grant("sim-documents");
        sim
    }

    /// Add an empty directory.
    pub fn add_dir(&self, capability: &str, label: &str) {
        self.state.lock().dirs.push(SimDir {
            root: StorageRoot {
                capability: capability.to_string(),
                label: label.to_string(),
            },
            tree: Arc::new(Mutex::new(BTreeMap::new())),
        });
    }

    fn tree(&self, capability: &str) -> Option<SimTree> {
        self.state
            .lock()
            .dirs
            .iter()
            .find(|d| d.root.capability == capability)
            .map(|d| Arc::clone(&d.tree))
    }

    /// Create or replace a file.
    pub fn put_file(&self, capability: &str, name: &str, content: &[u8]) {
        if let Some(tree) = self.tree(capability) {
            tree.lock().insert(name.to_string(), Some(content.to_vec()));
        }
    }

    /// Create a subdirectory.
    pub fn put_dir(&self, capability: &str, name: &str) {
        if let Some(tree) = self.tree(capability) {
            tree.lock().insert(name.to_string(), None);
        }
    }

    /// Content of a file, if present.
    pub fn file(&self, capability: &str, name: &str) -> Option<Vec<u8>> {
        self.tree(capability)
            .and_then(|tree| tree.lock().get(name).cloned().flatten())
    }

    /// Grant a directory without prompting.
    pub fn grant(&self, capability: &str) {
        let mut state = self.state.lock();
        state.granted.insert(capability.to_string());
        state.revoked.remove(capability);
    }

    /// Revoke access out-of-band.
    pub fn revoke(&self, capability: &str) {
        self.state.lock().revoked.insert(capability.to_string());
    }

    /// Downgrade a grant to read-only, which fails the permission check.
    pub fn set_read_only(&self, capability: &str) {
        self.state.lock().read_only.insert(capability.to_string());
    }

    /// Script the answer to subsequent prompts.
    pub fn set_prompt(&self, response: SimPromptResponse) {
        self.state.lock().prompt = response;
    }

    /// Toggle capability support.
    pub fn set_supported(&self, supported: bool) {
        self.state.lock().supported = supported;
    }

    /// Number of prompts shown.
    pub fn prompt_count(&self) -> usize {
        self.state.lock().prompts
    }
}

struct SimDirectory {
    tree: SimTree,
}

#[async_trait]
impl StorageDirectory for SimDirectory {
    async fn entries(&self) -> Result<Vec<DirEntry>, HalError> {
        Ok(self
            .tree
            .lock()
            .iter()
            .map(|(name, node)| DirEntry {
                name: name.clone(),
                kind: if node.is_some() {
                    EntryKind::File
                } else {
                    EntryKind::Directory
                },
            })
            .collect())
    }

    async fn read_entry(&self, name: &str) -> Result<Vec<u8>, HalError> {
        match self.tree.lock().get(name) {
            Some(Some(content)) => Ok(content.clone()),
            Some(None) => Err(HalError::InvalidDataFormat(format!(
                "{name} is a directory"
            ))),
            None => Err(HalError::CommunicationError(format!("{name} not found"))),
        }
    }

    async fn write_entry(&self, name: &str, content: &[u8]) -> Result<usize, HalError> {
        let mut tree = self.tree.lock();
        if let Some(None) = tree.get(name) {
            return Err(HalError::InvalidDataFormat(format!(
                "{name} is a directory"
            )));
        }
        tree.insert(name.to_string(), Some(content.to_vec()));
        Ok(content.len())
    }
}

#[async_trait]
impl StoragePlatform for SimStorage {
    fn is_supported(&self) -> bool {
        self.state.lock().supported
    }

    async fn granted_roots(&self) -> Result<Vec<StorageRoot>, HalError> {
        let state = self.state.lock();
        Ok(state
            .dirs
            .iter()
            .filter(|d| state.granted.contains(&d.root.capability))
            .map(|d| d.root.clone())
            .collect())
    }

    async fn has_permission(&self, root: &StorageRoot) -> bool {
        let state = self.state.lock();
        state.granted.contains(&root.capability)
            && !state.revoked.contains(&root.capability)
            && !state.read_only.contains(&root.capability)
    }

    async fn request_root(&self) -> Result<StorageRoot, HalError> {
        let mut state = self.state.lock();
        state.prompts += 1;
        let candidates: Vec<StorageRoot> = state.dirs.iter().map(|d| d.root.clone()).collect();
        let chosen = scripted_choice(&state.prompt, candidates, |r| r.capability.as_str())?;
        state.granted.insert(chosen.capability.clone());
        state.revoked.remove(&chosen.capability);
        state.read_only.remove(&chosen.capability);
        Ok(chosen)
    }

    async fn open(&self, root: &StorageRoot) -> Result<Box<dyn StorageDirectory>, HalError> {
        let tree = self.tree(&root.capability).ok_or_else(|| {
            HalError::NoDeviceAvailable(format!("{} no longer exists", root.label))
        })?;
        Ok(Box::new(SimDirectory { tree }))
    }
}

// ─── Wake-lock ──────────────────────────────────────────────────────

/// Simulated wake-lock host.
pub struct SimWakeLock {
    supported: AtomicBool,
    visible: AtomicBool,
    requests: AtomicUsize,
    held: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Default for SimWakeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWakeLock {
    /// Supported, visible host holding no lock.
    pub fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
            visible: AtomicBool::new(true),
            requests: AtomicUsize::new(0),
            held: Mutex::new(Vec::new()),
        }
    }

    /// Toggle capability support.
    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    /// Hide or show the host. Hiding releases every held lock.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
        if !visible {
            for released in self.held.lock().drain(..) {
                released.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Number of locks currently held.
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .iter()
            .filter(|r| !r.load(Ordering::SeqCst))
            .count()
    }

    /// Number of lock requests granted.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

struct SimSentinel {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl WakeLockSentinel for SimSentinel {
    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    async fn release(&self) -> Result<(), HalError> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl WakeLockPlatform for SimWakeLock {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    async fn request(&self, kind: &str) -> Result<Box<dyn WakeLockSentinel>, HalError> {
        if !self.is_visible() {
            return Err(HalError::PermissionDenied(format!(
                "{kind} wake-lock requested while hidden"
            )));
        }
        let released = Arc::new(AtomicBool::new(false));
        let mut held = self.held.lock();
        held.retain(|r| !r.load(Ordering::SeqCst));
        held.push(Arc::clone(&released));
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimSentinel { released }))
    }
}
