use std::borrow::Cow;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::command::{BatchId, Command, Dispatch, ErrorCode, ListMode, ListNameType, ListNames};
use crate::exec::Playback;
use crate::list::ReleaseSummary;
use crate::loopback;
use crate::record::{RecordError, Recorded, Recorder};
use crate::registry::SharedLists;
use crate::unpack::{self, PixelSource, PixelStore};

/// One client of a share group: the list-management entry points plus the
/// switch between recording and immediate dispatch.
pub struct Context<D: Dispatch> {
    shared: Arc<SharedLists>,
    driver: D,
    recorder: Option<Recorder>,
    list_base: u32,
    pixel_store: PixelStore,
}

impl<D: Dispatch> Context<D> {
    pub fn new(shared: Arc<SharedLists>, driver: D) -> Self {
        let pixel_store = PixelStore::with_alignment(shared.config().unpack_alignment);
        Self {
            shared,
            driver,
            recorder: None,
            list_base: 0,
            pixel_store,
        }
    }

    pub fn shared(&self) -> &Arc<SharedLists> {
        &self.shared
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    /// Name of the list being recorded, or 0.
    pub fn list_index(&self) -> u32 {
        self.recorder.as_ref().map_or(0, Recorder::name)
    }

    pub fn list_mode(&self) -> Option<ListMode> {
        self.recorder.as_ref().map(Recorder::mode)
    }

    pub fn current_list_base(&self) -> u32 {
        self.list_base
    }

    pub fn pixel_store(&self) -> &PixelStore {
        &self.pixel_store
    }

    pub fn pixel_store_mut(&mut self) -> &mut PixelStore {
        &mut self.pixel_store
    }

    fn raise(&mut self, code: ErrorCode, message: &str) {
        self.driver.error(code, message);
    }

    fn executes(&self) -> bool {
        self.recorder
            .as_ref()
            .is_none_or(|recorder| recorder.mode().executes())
    }

    fn report(&mut self, err: RecordError) {
        let message = err.to_string();
        self.raise(err.code(), &message);
    }

    fn play(&mut self, run: impl FnOnce(&mut Playback<'_, D>)) {
        let mut playback = Playback::new(&self.shared, &mut self.driver, &mut self.list_base);
        run(&mut playback);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.invalidate_cache();
        }
    }

    pub fn gen_lists(&mut self, range: i32) -> u32 {
        let Ok(range) = u32::try_from(range) else {
            self.raise(ErrorCode::InvalidValue, "glGenLists");
            return 0;
        };
        self.shared.gen_lists(range)
    }

    pub fn is_list(&self, name: u32) -> bool {
        self.shared.is_list(name)
    }

    pub fn delete_lists(&mut self, first: u32, range: i32) -> ReleaseSummary {
        let Ok(range) = u32::try_from(range) else {
            self.raise(ErrorCode::InvalidValue, "glDeleteLists");
            return ReleaseSummary::default();
        };
        self.shared.delete_range(first, range)
    }

    pub fn new_list(&mut self, name: u32, mode: u32) {
        if name == 0 {
            self.raise(ErrorCode::InvalidValue, "glNewList");
            return;
        }
        let Some(mode) = ListMode::from_raw(mode) else {
            self.raise(ErrorCode::InvalidEnum, "glNewList");
            return;
        };
        if self.recorder.is_some() {
            self.raise(ErrorCode::InvalidOperation, "glNewList");
            return;
        }
        debug!(list = name, ?mode, "begin recording");
        self.recorder = Some(Recorder::new(name, mode, self.shared.config()));
    }

    /// Finishes the recording and publishes it, replacing any list with the
    /// same name.
    pub fn end_list(&mut self) {
        let Some(recorder) = self.recorder.take() else {
            self.raise(ErrorCode::InvalidOperation, "glEndList");
            return;
        };
        let (mut list, use_loopback) = recorder.finish();
        let name = list.name();
        let mut table = self.shared.lock();
        if use_loopback {
            loopback::rewrite(&mut table, &mut list, self.list_base);
        }
        let replaced = table.publish(list, self.shared.config(), self.shared.batch_provider());
        drop(table);
        if let Some(summary) = replaced {
            debug!(list = name, ?summary, "replaced list");
        }
    }

    pub fn call_list(&mut self, name: u32) {
        if let Some(recorder) = self.recorder.as_mut() {
            let executes = recorder.mode().executes();
            if let Err(err) = recorder.record(&Command::CallList(name)) {
                self.report(err);
            }
            if !executes {
                return;
            }
        }
        if name == 0 {
            self.raise(ErrorCode::InvalidValue, "glCallList(list==0)");
            return;
        }
        self.play(|playback| playback.call_list(name));
    }

    /// Calls `n` lists named by a typed client array, each offset by the
    /// current list base.
    pub fn call_lists(&mut self, n: i32, ty: u32, lists: &[u8]) {
        let Ok(count) = usize::try_from(n) else {
            self.compile_error(ErrorCode::InvalidValue, "glCallLists(n < 0)");
            return;
        };
        let Some(ty) = ListNameType::from_raw(ty) else {
            self.compile_error(ErrorCode::InvalidEnum, "glCallLists(type)");
            return;
        };
        let Some(data) = count.checked_mul(ty.size()).and_then(|len| lists.get(..len)) else {
            self.compile_error(ErrorCode::InvalidOperation, "glCallLists(lists)");
            return;
        };
        self.call_list_names(&ListNames::new(ty, data));
    }

    pub fn call_list_names(&mut self, names: &ListNames) {
        if let Some(recorder) = self.recorder.as_mut() {
            let executes = recorder.mode().executes();
            if let Err(err) = recorder.record(&Command::CallLists(names.clone())) {
                self.report(err);
            }
            if !executes {
                return;
            }
        }
        self.play(|playback| playback.call_lists(names));
    }

    pub fn list_base(&mut self, base: u32) {
        if let Some(recorder) = self.recorder.as_mut() {
            let executes = recorder.mode().executes();
            if let Err(err) = recorder.record(&Command::ListBase(base)) {
                self.report(err);
            }
            if !executes {
                return;
            }
        }
        self.list_base = base;
    }

    /// Reports a usage error found by a wrapper. While recording the error is
    /// stored in the list and surfaces when the list executes; in
    /// compile-and-execute mode it is raised now as well.
    pub fn compile_error(&mut self, code: ErrorCode, message: impl Into<Cow<'static, str>>) {
        let message = message.into();
        if let Some(recorder) = self.recorder.as_mut() {
            let executes = recorder.mode().executes();
            if let Err(err) = recorder.record_error(code, message.clone()) {
                self.report(err);
            }
            if !executes {
                return;
            }
        }
        self.raise(code, &message);
    }

    /// Takes ownership of a filled vertex batch. A recorded batch is released
    /// with its list; an immediate one is played and released right away.
    pub fn record_vertex_batch(&mut self, batch: BatchId) {
        if batch.0 == 0 {
            self.compile_error(ErrorCode::InvalidValue, "vertex batch 0");
            return;
        }
        let command = Command::VertexBatch {
            batch,
            loopback: false,
        };
        let mut owned = false;
        if let Some(recorder) = self.recorder.as_mut() {
            let executes = recorder.mode().executes();
            match recorder.record(&command) {
                Ok(_) => owned = true,
                Err(err) => self.report(err),
            }
            if !executes {
                if !owned {
                    self.destroy_batch(batch);
                }
                return;
            }
        }
        match self.shared.batch_provider() {
            Some(provider) => provider.playback(batch, false, &mut self.driver),
            None => self.driver.dispatch(&command),
        }
        if !owned {
            self.destroy_batch(batch);
        }
    }

    fn destroy_batch(&self, batch: BatchId) {
        match self.shared.batch_provider() {
            Some(provider) => provider.destroy(batch),
            None => warn!(batch = batch.0, "no batch provider to release batch"),
        }
    }

    /// Entry point for every other command: recorded while a list is open,
    /// dispatched when not recording or in compile-and-execute mode.
    pub fn submit(&mut self, command: Command) {
        match command {
            Command::CallList(name) => return self.call_list(name),
            Command::CallLists(names) => return self.call_list_names(&names),
            Command::ListBase(base) => return self.list_base(base),
            Command::VertexBatch { batch, .. } => return self.record_vertex_batch(batch),
            Command::Error { code, message } => return self.compile_error(code, message),
            _ => {}
        }

        let Some(recorder) = self.recorder.as_mut() else {
            self.driver.dispatch(&command);
            return;
        };
        let executes = recorder.mode().executes();
        match recorder.record(&command) {
            Ok(Recorded::Stored | Recorded::Elided) => {}
            Ok(Recorded::Deferred(code, message)) => {
                if executes {
                    self.raise(code, message);
                }
                return;
            }
            Err(err) => self.report(err),
        }
        if executes {
            self.driver.dispatch(&command);
        }
    }

    pub fn draw_pixels(
        &mut self,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        source: PixelSource<'_>,
    ) {
        match unpack::unpack_image(width, height, format, ty, source, &self.pixel_store) {
            Ok(pixels) => self.submit(Command::DrawPixels {
                width,
                height,
                format,
                ty,
                pixels,
            }),
            Err(err) => self.compile_error(err.code(), format!("glDrawPixels: {err}")),
        }
    }

    pub fn bitmap(
        &mut self,
        width: i32,
        height: i32,
        origin: [f32; 2],
        advance: [f32; 2],
        source: PixelSource<'_>,
    ) {
        match unpack::unpack_bitmap(width, height, source, &self.pixel_store) {
            Ok(bitmap) => self.submit(Command::Bitmap {
                width,
                height,
                origin,
                advance,
                bitmap,
            }),
            Err(err) => self.compile_error(err.code(), format!("glBitmap: {err}")),
        }
    }

    pub fn polygon_stipple(&mut self, source: PixelSource<'_>) {
        match unpack::unpack_polygon_stipple(source, &self.pixel_store) {
            Ok(pattern) => self.submit(Command::PolygonStipple(pattern)),
            Err(err) => self.compile_error(err.code(), format!("glPolygonStipple: {err}")),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        source: PixelSource<'_>,
    ) {
        match unpack::unpack_image(width, height, format, ty, source, &self.pixel_store) {
            Ok(pixels) => self.submit(Command::TexImage2D {
                target,
                level,
                internal_format,
                width,
                height,
                format,
                ty,
                pixels,
            }),
            Err(err) => self.compile_error(err.code(), format!("glTexImage2D: {err}")),
        }
    }

    pub fn uniform_4fv(&mut self, location: i32, values: &[f32]) {
        let Some(count) = element_count(values.len(), 4) else {
            self.compile_error(ErrorCode::InvalidValue, "glUniform4fv(count)");
            return;
        };
        let used = values.len() / 4 * 4;
        self.submit(Command::Uniform4fv {
            location,
            count,
            values: Some(Arc::from(&values[..used])),
        });
    }

    pub fn pixel_map(&mut self, map: u32, values: &[f32]) {
        let Some(size) = element_count(values.len(), 1) else {
            self.compile_error(ErrorCode::InvalidValue, "glPixelMapfv(mapsize)");
            return;
        };
        self.submit(Command::PixelMap {
            map,
            size,
            values: Some(Arc::from(values)),
        });
    }

    pub fn object_label(&mut self, name: u32, label: Option<&str>) {
        if !self.shared.set_label(name, label) {
            self.raise(ErrorCode::InvalidValue, "glObjectLabel(name)");
        }
    }

    pub fn object_label_of(&self, name: u32) -> Option<String> {
        self.shared.label(name)
    }
}

impl<D: Dispatch> Drop for Context<D> {
    fn drop(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            let name = recorder.name();
            let summary = recorder.discard(self.shared.batch_provider());
            debug!(list = name, ?summary, "discarded unfinished list");
        }
    }
}

/// Whole `per_element`-sized elements in `len` values, as the API's signed
/// count. `None` when the count does not fit.
fn element_count(len: usize, per_element: usize) -> Option<i32> {
    i32::try_from(len / per_element).ok()
}
