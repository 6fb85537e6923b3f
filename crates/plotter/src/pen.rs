use crate::{axis::AxisId, motion::{Coordinator, Watchdog}, Result};

/// Whether the chalk is still good after putting the pen down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChalkStatus {
    Ready,
    NeedsReload,
}

impl Coordinator {
    fn move_pen(&mut self, target: i32) -> Result<()> {
        self.pen.run_to_abs_pos(target, self.pen_settings.speed);
        let mut watchdog = Watchdog::new(self.timing.stall_ticks);
        while self.pen.is_running() {
            self.clock.sleep(self.timing.tick());
            watchdog.observe(&[(AxisId::Pen, self.pen.position())])?;
        }
        Ok(())
    }

    pub fn pen_up(&mut self) -> Result<()> {
        let result = self.move_pen(self.pen_settings.up);
        if result.is_err() {
            self.stop_all();
        }
        result
    }

    /// Puts the pen on the canvas. With chalk, this also pushes the stick
    /// forward until it touches, which can use it up.
    pub fn pen_down(&mut self) -> Result<ChalkStatus> {
        let result = self.pen_down_inner();
        if !matches!(result, Ok(ChalkStatus::Ready)) {
            self.stop_all();
        }
        result
    }

    fn pen_down_inner(&mut self) -> Result<ChalkStatus> {
        self.move_pen(self.pen_settings.down)?;
        let Some(chalk) = self.chalk.as_mut() else {
            return Ok(ChalkStatus::Ready);
        };

        // The sensor bounces when the pen lands.
        self.clock.sleep(self.timing.debounce());

        let mut watchdog = Watchdog::new(self.timing.stall_ticks);
        while chalk.sensor_pressed() {
            chalk.push();
            if chalk.exhausted() {
                chalk.rest();
                return Ok(ChalkStatus::NeedsReload);
            }
            self.clock.sleep(self.timing.tick());
            watchdog.observe(&[(AxisId::Chalk, chalk.position())])?;
        }
        chalk.rest();
        Ok(ChalkStatus::Ready)
    }
}
