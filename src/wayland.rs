// SPDX-License-Identifier: MPL-2.0

//! Layer-shell windows on every Wayland output.
//!
//! Each desktop window is a layer surface on the background layer, anchored
//! to all edges of its output. Video frames are pulled from the attached
//! layer's frame queue on compositor frame callbacks and copied into shm
//! buffers.

use std::{cell::RefCell, rc::Rc};

use sctk::{
    compositor::{CompositorHandler, CompositorState, Region},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry, delegate_shm,
    output::{OutputHandler, OutputInfo, OutputState},
    reexports::client::{
        Connection, QueueHandle,
        protocol::{wl_output, wl_surface},
    },
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::{
        WaylandSurface,
        wlr_layer::{
            Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
            LayerSurfaceConfigure,
        },
    },
    shm::{Shm, ShmHandler, slot::SlotPool},
};
use tracing::{debug, error, info, warn};

use crate::{
    controller::Controller,
    draw,
    error::WindowError,
    media::VideoLayer,
    surface::ContentView,
    window::{DisplayInfo, DisplayServer, PlatformWindow, Rect, WindowConfig, WindowLevel},
};

/// Wayland state reachable from both the event handlers and the windows the
/// session creates.
pub struct WaylandShared {
    compositor_state: CompositorState,
    layer_state: LayerShell,
    qh: QueueHandle<App>,
    displays: Vec<(wl_output::WlOutput, DisplayInfo)>,
    views: Vec<Rc<RefCell<LayerView>>>,
    labels: draw::Labels,
}

impl WaylandShared {
    pub fn new(
        compositor_state: CompositorState,
        layer_state: LayerShell,
        qh: QueueHandle<App>,
    ) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            compositor_state,
            layer_state,
            qh,
            displays: Vec::new(),
            views: Vec::new(),
            labels: draw::Labels::default(),
        }))
    }

    fn view(&self, surface: &wl_surface::WlSurface) -> Option<Rc<RefCell<LayerView>>> {
        self.views
            .iter()
            .find(|view| view.borrow().layer.wl_surface() == surface)
            .cloned()
    }
}

/// One layer surface and what it currently shows.
pub struct LayerView {
    display: String,
    layer: LayerSurface,
    scale: i32,
    /// Logical size from the last configure.
    size: Option<(u32, u32)>,
    pool: Option<SlotPool>,
    content: Option<VideoLayer>,
    placeholder: Option<String>,
    labels: draw::Labels,
    /// Static content changed and has to be presented once.
    dirty: bool,
}

impl LayerView {
    fn buffer_size(&self) -> Option<(u32, u32)> {
        let (width, height) = self.size?;
        let scale = self.scale.max(1) as u32;
        (width > 0 && height > 0).then_some((width * scale, height * scale))
    }

    fn draw(&mut self, qh: &QueueHandle<App>) {
        let Some((width, height)) = self.buffer_size() else {
            return;
        };
        let Some(pool) = self.pool.as_mut() else {
            return;
        };

        let buffer = match (&self.content, self.dirty) {
            (Some(layer), dirty) => match layer.frames().and_then(|frames| frames.try_pop()) {
                Some(frame) => draw::frame_canvas(pool, &frame, layer.gravity, width, height),
                None if dirty => draw::solid_canvas(pool, draw::BACKDROP, width, height),
                None => {
                    draw::request_frame(&self.layer, qh);
                    return;
                }
            },
            (None, true) => match &self.placeholder {
                Some(message) => {
                    draw::placeholder_canvas(pool, &self.labels, message, self.scale, width, height)
                }
                None => draw::solid_canvas(pool, draw::BACKDROP, width, height),
            },
            (None, false) => return,
        };

        match buffer {
            Ok(buffer) => {
                self.layer.wl_surface().set_buffer_scale(self.scale.max(1));
                draw::layer_surface(&self.layer, qh, &buffer, (width as i32, height as i32));
                self.dirty = false;
            }
            Err(why) => error!(display = self.display, ?why, "failed to create shm buffer"),
        }
    }
}

/// The [`DisplayServer`] backed by wl_output globals.
pub struct WaylandDisplays {
    shared: Rc<RefCell<WaylandShared>>,
}

impl WaylandDisplays {
    pub fn new(shared: Rc<RefCell<WaylandShared>>) -> Self {
        Self { shared }
    }
}

impl DisplayServer for WaylandDisplays {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.shared
            .borrow()
            .displays
            .iter()
            .map(|(_, display)| display.clone())
            .collect()
    }

    fn create_window(
        &mut self,
        display: &DisplayInfo,
        config: &WindowConfig,
    ) -> Result<Box<dyn PlatformWindow>, WindowError> {
        let mut shared = self.shared.borrow_mut();
        let output = shared
            .displays
            .iter()
            .find(|(_, info)| info.id == display.id)
            .map(|(output, _)| output.clone())
            .ok_or(WindowError::UnknownDisplay(display.id))?;

        let layer_kind = match config.level {
            WindowLevel::BelowDesktopIcons => Layer::Background,
        };

        let surface = shared.compositor_state.create_surface(&shared.qh);
        let layer = shared.layer_state.create_layer_surface(
            &shared.qh,
            surface,
            layer_kind,
            Some("wallpaper"),
            Some(&output),
        );
        layer.set_size(0, 0);
        layer.set_anchor(Anchor::all());
        layer.set_exclusive_zone(-1);
        layer.set_keyboard_interactivity(if config.activates {
            KeyboardInteractivity::OnDemand
        } else {
            KeyboardInteractivity::None
        });

        if config.mouse_transparent {
            let region = Region::new(&shared.compositor_state)
                .map_err(|why| WindowError::Create(why.to_string()))?;
            layer.wl_surface().set_input_region(Some(region.wl_region()));
        }
        layer.commit();

        let view = Rc::new(RefCell::new(LayerView {
            display: display.name.clone(),
            layer,
            scale: 1,
            size: None,
            pool: None,
            content: None,
            placeholder: None,
            labels: shared.labels.clone(),
            dirty: true,
        }));
        shared.views.push(view.clone());

        Ok(Box::new(WaylandWindow {
            view,
            shared: self.shared.clone(),
            qh: shared.qh.clone(),
        }))
    }
}

/// A desktop window handed to the session.
pub struct WaylandWindow {
    view: Rc<RefCell<LayerView>>,
    shared: Rc<RefCell<WaylandShared>>,
    qh: QueueHandle<App>,
}

impl ContentView for WaylandWindow {
    fn attach_layer(&mut self, layer: VideoLayer) {
        let mut view = self.view.borrow_mut();
        view.content = Some(layer);
        view.placeholder = None;
        view.dirty = true;
        view.draw(&self.qh);
    }

    fn detach_layer(&mut self) -> Option<VideoLayer> {
        let mut view = self.view.borrow_mut();
        let layer = view.content.take();
        view.dirty = true;
        view.draw(&self.qh);
        layer
    }

    fn show_placeholder(&mut self, message: &str) {
        let mut view = self.view.borrow_mut();
        warn!(display = view.display, message, "showing placeholder");
        view.placeholder = Some(message.to_owned());
        view.dirty = true;
        view.draw(&self.qh);
    }
}

impl PlatformWindow for WaylandWindow {
    fn content(&mut self) -> &mut dyn ContentView {
        self
    }

    fn close(&mut self) {
        self.shared
            .borrow_mut()
            .views
            .retain(|view| !Rc::ptr_eq(view, &self.view));
        // The layer surface is destroyed with the last reference to the view.
    }
}

/// State of the main loop.
pub struct App {
    pub registry_state: RegistryState,
    pub output_state: OutputState,
    pub shm_state: Shm,
    pub shared: Rc<RefCell<WaylandShared>>,
    pub controller: Option<Controller>,
    pub exit: bool,
}

impl App {
    fn topology_changed(&mut self) {
        if let Some(controller) = self.controller.as_mut() {
            controller.display_topology_changed();
        }
    }
}

/// Physical frame of an output.
fn display_frame(
    logical_position: Option<(i32, i32)>,
    logical_size: Option<(i32, i32)>,
    scale_factor: i32,
    mode: Option<(i32, i32)>,
) -> Rect {
    let scale = scale_factor.max(1);
    let (x, y) = logical_position.unwrap_or((0, 0));
    let (width, height) = logical_size
        .map(|(w, h)| (w * scale, h * scale))
        .or(mode)
        .unwrap_or((0, 0));

    Rect {
        x,
        y,
        width: width.max(0) as u32,
        height: height.max(0) as u32,
    }
}

fn display_info(info: &OutputInfo) -> DisplayInfo {
    let mode = info
        .modes
        .iter()
        .find(|mode| mode.current)
        .map(|mode| mode.dimensions);

    DisplayInfo {
        id: info.id,
        name: info
            .name
            .clone()
            .unwrap_or_else(|| format!("{} {}", info.make, info.model)),
        frame: display_frame(
            info.logical_position,
            info.logical_size,
            info.scale_factor,
            mode,
        ),
    }
}

impl CompositorHandler for App {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        new_factor: i32,
    ) {
        let Some(view) = self.shared.borrow().view(surface) else {
            return;
        };
        let mut view = view.borrow_mut();
        if view.scale != new_factor {
            view.scale = new_factor;
            view.dirty = true;
            view.draw(qh);
        }
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
        let Some(view) = self.shared.borrow().view(surface) else {
            return;
        };
        view.borrow_mut().draw(qh);
    }

    fn surface_enter(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }

    fn surface_leave(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _output: &wl_output::WlOutput,
    ) {
    }
}

impl OutputHandler for App {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        wl_output: wl_output::WlOutput,
    ) {
        let Some(info) = self.output_state.info(&wl_output) else {
            return;
        };
        let screen = display_info(&info);
        info!(
            display = screen.name,
            width = screen.frame.width,
            height = screen.frame.height,
            "output connected"
        );

        self.shared.borrow_mut().displays.push((wl_output, screen));
        self.topology_changed();
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        wl_output: wl_output::WlOutput,
    ) {
        let Some(info) = self.output_state.info(&wl_output) else {
            return;
        };
        let display = display_info(&info);

        let changed = {
            let mut shared = self.shared.borrow_mut();
            match shared.displays.iter_mut().find(|(output, _)| *output == wl_output) {
                Some((_, known)) if *known == display => false,
                Some((_, known)) => {
                    *known = display;
                    true
                }
                None => {
                    shared.displays.push((wl_output, display));
                    true
                }
            }
        };

        if changed {
            debug!("output geometry changed");
            self.topology_changed();
        }
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        wl_output: wl_output::WlOutput,
    ) {
        let removed = {
            let mut shared = self.shared.borrow_mut();
            let before = shared.displays.len();
            shared.displays.retain(|(output, _)| *output != wl_output);
            before != shared.displays.len()
        };

        if removed {
            info!("output disconnected");
            self.topology_changed();
        }
    }
}

impl LayerShellHandler for App {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, layer: &LayerSurface) {
        let Some(view) = self.shared.borrow().view(layer.wl_surface()) else {
            return;
        };
        debug!(display = view.borrow().display, "layer surface closed by compositor");
        self.topology_changed();
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let Some(view) = self.shared.borrow().view(layer.wl_surface()) else {
            return;
        };
        let mut view = view.borrow_mut();
        view.size = Some(configure.new_size);

        let Some((width, height)) = view.buffer_size() else {
            return;
        };
        let len = width as usize * height as usize * 4;
        if let Some(pool) = view.pool.as_mut() {
            if let Err(why) = pool.resize(len) {
                error!(display = view.display, %why, "failed to resize shm pool");
                return;
            }
        } else {
            match SlotPool::new(len, &self.shm_state) {
                Ok(pool) => view.pool = Some(pool),
                Err(why) => {
                    error!(display = view.display, %why, "failed to create shm pool");
                    return;
                }
            }
        }

        view.dirty = true;
        view.draw(qh);
    }
}

impl ShmHandler for App {
    fn shm_state(&mut self) -> &mut Shm {
        &mut self.shm_state
    }
}

delegate_compositor!(App);
delegate_output!(App);
delegate_shm!(App);

delegate_layer!(App);

delegate_registry!(App);

impl ProvidesRegistryState for App {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }
    registry_handlers![OutputState];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_use_the_scaled_logical_size() {
        let frame = display_frame(Some((1280, 0)), Some((1280, 720)), 2, Some((2560, 1440)));
        assert_eq!(
            frame,
            Rect {
                x: 1280,
                y: 0,
                width: 2560,
                height: 1440
            }
        );
    }

    #[test]
    fn frames_fall_back_to_the_current_mode() {
        let frame = display_frame(None, None, 1, Some((1920, 1080)));
        assert_eq!((frame.width, frame.height), (1920, 1080));
        assert_eq!((frame.x, frame.y), (0, 0));
    }

    #[test]
    fn unknown_geometry_is_empty() {
        assert_eq!(display_frame(None, None, 0, None), Rect::default());
    }
}
