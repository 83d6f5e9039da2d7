// vim: tw=80
//! A mirror with no owning raid group object.
//!
//! Raw mirrors hold the bootstrap metadata that must be readable before any
//! raid group exists.  They bind directly to their drives' edges and track
//! down drives themselves.

use std::{
    sync::Arc,
    thread,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::LibraryOptions,
    geometry::{GeometryDescriptor, RaidType, SECTORS_PER_ELEMENT},
    group::{GroupServices, RaidGroup},
    request::{Completion, EdgeHandle, EdgeProvider, Iots},
    types::*,
};

/// Raw mirrors are not objects, so they all share one id in diagnostics.
pub const RAW_MIRROR_OBJECT_ID: ObjectId = ObjectId(0xffff_fffe);

pub struct RawMirror {
    group: RaidGroup,
    edge_provider: Arc<dyn EdgeProvider>,
    edges: Mutex<Vec<Option<EdgeHandle>>>,
    down: Mutex<PositionBitmask>,
}

impl RawMirror {
    /// Build a `width`-way raw mirror of `capacity` blocks, starting at
    /// block `offset` of each drive.
    pub fn new(width: u32, offset: LbaT, capacity: LbaT,
               options: Arc<LibraryOptions>,
               edge_provider: Arc<dyn EdgeProvider>,
               services: GroupServices) -> Result<Self>
    {
        let mut gd = GeometryDescriptor::new(RAW_MIRROR_OBJECT_ID,
            RaidType::RawMirror.owning_class(), options);
        gd.init();
        gd.set_configuration(width, RaidType::RawMirror, SECTORS_PER_ELEMENT,
                             0, capacity, capacity)?;
        gd.set_raw_mirror_offsets(offset, 0)?;
        gd.set_block_sizes(BYTES_PER_BLOCK as u32, BYTES_PER_BLOCK as u32, 1)?;
        Ok(RawMirror {
            group: RaidGroup::new(gd, services),
            edge_provider,
            edges: Mutex::new(vec![None; width as usize]),
            down: Mutex::new(PositionBitmask::EMPTY),
        })
    }

    pub fn group(&self) -> &RaidGroup {
        &self.group
    }

    fn width(&self) -> PositionT {
        self.group.geometry().width() as PositionT
    }

    fn check_position(&self, position: PositionT) -> Result<()> {
        if position >= self.width() {
            Err(Error::InvalidPosition)
        } else {
            Ok(())
        }
    }

    /// Connect to every drive.
    ///
    /// A drive that is still being created reports `NotFound`; poll it until
    /// it appears or the configured retries run out.  Blocks the calling
    /// thread while polling.
    #[tracing::instrument(skip(self))]
    pub fn bind_edges(&self) -> Result<()> {
        let options = self.group.geometry().options();
        for position in 0..self.width() {
            let mut retries = 0;
            let edge = loop {
                match self.edge_provider.get_edge(position) {
                    Ok(edge) => break edge,
                    Err(Error::NotFound) if retries < options.edge_retry_count
                    => {
                        retries += 1;
                        thread::sleep(options.edge_retry_interval());
                    }
                    Err(e) => {
                        warn!(position, retries, "cannot bind edge: {e}");
                        return Err(e);
                    }
                }
            };
            debug!(position, ?edge, retries, "bound");
            self.edges.lock()[usize::from(position)] = Some(edge);
        }
        Ok(())
    }

    pub fn edge(&self, position: PositionT) -> Option<EdgeHandle> {
        self.edges.lock().get(usize::from(position)).copied().flatten()
    }

    fn update_down(&self, f: impl FnOnce(&mut PositionBitmask)) {
        let mut down = self.down.lock();
        f(&mut down);
        self.group.set_rebuild_logging_bitmask(*down);
    }

    pub fn set_down_disk(&self, position: PositionT) -> Result<()> {
        self.check_position(position)?;
        info!(position, "raw mirror drive down");
        self.update_down(|d| d.insert(position));
        Ok(())
    }

    pub fn clear_down_disk(&self, position: PositionT) -> Result<()> {
        self.check_position(position)?;
        info!(position, "raw mirror drive up");
        self.update_down(|d| d.remove(position));
        Ok(())
    }

    pub fn degraded_bitmask(&self) -> PositionBitmask {
        *self.down.lock()
    }

    /// Begin an I/O.  With every drive down it fails at once, without
    /// reaching the scheduler.
    pub fn start_io(&self, opcode: Opcode, lba: LbaT, blocks: BlockCountT,
                    callback: Completion) -> Result<Arc<Iots>>
    {
        let capacity = self.group.geometry().configured_capacity();
        let end = lba.checked_add(blocks).ok_or(Error::InvalidParams)?;
        if blocks == 0 || end > capacity {
            return Err(Error::InvalidParams);
        }
        let iots = self.group.new_request(opcode, lba, blocks, callback);
        let all = PositionBitmask::all(usize::from(self.width()))?;
        if iots.rebuild_logging_bitmask() == all {
            warn!(request = %iots.id(), "every raw mirror drive is down");
            iots.set_result(BlockResult::new(BlockStatus::IoFailed,
                                             BlockQualifier::RetryNotPossible));
            iots.mark_complete();
            iots.invoke_callback()?;
        } else {
            self.group.submit(iots.clone())?;
        }
        Ok(iots)
    }

    pub fn quiesce(&self) -> bool {
        self.group.quiesce()
    }

    pub fn is_quiesced(&self) -> bool {
        self.group.is_quiesced()
    }

    pub fn unquiesce(&self) -> Result<()> {
        self.group.unquiesce()
    }

    pub fn complete_iots(&self, iots: &Arc<Iots>) -> Result<()> {
        self.group.iots_complete(iots)
    }
}

// LCOV_EXCL_STOP
