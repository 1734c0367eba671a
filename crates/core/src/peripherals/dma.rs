// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::AddressWindow;
use crate::chip::ChipCore;
use crate::interrupt::InterruptMultiplexer;
use crate::logging::WarningKind;
use crate::peripherals::{merge_byte, select_byte};
use crate::{AccessMode, IoContext, IoUnit, SimResult, UnitId};
use std::any::Any;

pub const CHANNELS: usize = 3;
const CHANNEL_STRIDE: u32 = 8;

// Control word bits
pub const DMAREQ: u16 = 0x0001;
pub const DMAABORT: u16 = 0x0002;
pub const DMAIE: u16 = 0x0004;
pub const DMAIFG: u16 = 0x0008;
pub const DMAEN: u16 = 0x0010;
pub const DMALEVEL: u16 = 0x0020;
pub const DMASRCBYTE: u16 = 0x0040;
pub const DMADSTBYTE: u16 = 0x0080;

// Increment codes for bits 9-8 (source) and 11-10 (destination)
pub const INCR_NONE: u16 = 0;
pub const INCR_DEC: u16 = 2;
pub const INCR_INC: u16 = 3;

/// Transfer mode bit 14: repeat.
const DT_REPEAT: u16 = 0x4;
/// Transfer modes 1-3 and 5-7 move a whole block per trigger.
const DT_BLOCK_MASK: u16 = 0x3;

/// Where a trigger comes from: a peripheral and one of its trigger outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct TriggerSource {
    pub unit: UnitId,
    pub index: u8,
}

/// One unit of data the bus should move for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    pub source: u32,
    pub destination: u32,
    pub source_mode: AccessMode,
    pub destination_mode: AccessMode,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
struct DmaChannel {
    /// Control word as written; IFG lives in `ifg`.
    ctl: u16,
    // Configured registers
    source: u16,
    destination: u16,
    size: u16,
    // In-flight registers, loaded on the enable edge and on every pass end
    current_source: u16,
    current_destination: u16,
    remaining: u16,
    ifg: bool,
    transfers: u64,
}

impl DmaChannel {
    fn enabled(&self) -> bool {
        self.ctl & DMAEN != 0
    }

    fn interrupt_enabled(&self) -> bool {
        self.ctl & DMAIE != 0
    }

    fn transfer_mode(&self) -> u16 {
        (self.ctl >> 12) & 0x7
    }

    fn repeat(&self) -> bool {
        self.transfer_mode() & DT_REPEAT != 0
    }

    fn block(&self) -> bool {
        self.transfer_mode() & DT_BLOCK_MASK != 0
    }

    fn source_mode(&self) -> AccessMode {
        if self.ctl & DMASRCBYTE != 0 {
            AccessMode::Byte
        } else {
            AccessMode::Word
        }
    }

    fn destination_mode(&self) -> AccessMode {
        if self.ctl & DMADSTBYTE != 0 {
            AccessMode::Byte
        } else {
            AccessMode::Word
        }
    }

    fn reload(&mut self) {
        self.current_source = self.source;
        self.current_destination = self.destination;
        self.remaining = self.size;
    }

    fn read_ctl(&self) -> u16 {
        let ctl = self.ctl & !DMAIFG;
        if self.ifg {
            ctl | DMAIFG
        } else {
            ctl
        }
    }
}

/// Moves `address` by one unit in the direction selected by `code`.
fn advance(address: u16, code: u16, mode: AccessMode) -> u16 {
    let unit = mode.bytes() as u16;
    match code {
        INCR_DEC => address.wrapping_sub(unit),
        INCR_INC => address.wrapping_add(unit),
        _ => address,
    }
}

/// Three-channel DMA controller.
///
/// DMACTL0 holds a 4-bit trigger select per channel. Select 0 is the
/// software request (DMAREQ in the channel control word); the other
/// values are bound to peripheral trigger outputs at configuration time.
#[derive(Debug, serde::Serialize)]
pub struct Dma {
    #[serde(skip)]
    chip: ChipCore,
    control_base: u32,
    channel_base: u32,
    dmactl0: u16,
    dmactl1: u16,
    channels: [DmaChannel; CHANNELS],
    triggers: [Option<TriggerSource>; 16],
    mux: InterruptMultiplexer,
    /// Own arena slot, learned on the first software request.
    #[serde(skip)]
    unit: Option<UnitId>,
}

impl Dma {
    pub fn new(chip: ChipCore, control_base: u32, channel_base: u32, vector: u8) -> Self {
        Self {
            chip,
            control_base,
            channel_base,
            dmactl0: 0,
            dmactl1: 0,
            channels: Default::default(),
            triggers: [None; 16],
            mux: InterruptMultiplexer::new(vector),
            unit: None,
        }
    }

    pub fn windows(&self) -> Vec<AddressWindow> {
        vec![
            AddressWindow::new(self.control_base, 4),
            AddressWindow::new(self.channel_base, CHANNEL_STRIDE * CHANNELS as u32),
        ]
    }

    pub fn vector(&self) -> u8 {
        self.mux.vector()
    }

    pub fn bind_trigger(&mut self, select: u8, source: TriggerSource) -> anyhow::Result<()> {
        if select == 0 || select as usize >= self.triggers.len() {
            anyhow::bail!("DMA trigger select {} cannot be bound (1..=15)", select);
        }
        self.triggers[select as usize] = Some(source);
        Ok(())
    }

    fn select(&self, channel: usize) -> u8 {
        ((self.dmactl0 >> (4 * channel)) & 0xF) as u8
    }

    /// Channels whose trigger select currently resolves to `source`.
    pub fn channels_for(&self, source: TriggerSource) -> Vec<usize> {
        (0..CHANNELS)
            .filter(|&ch| match self.select(ch) {
                0 => Some(source.unit) == self.unit && source.index as usize == ch,
                sel => self.triggers[sel as usize] == Some(source),
            })
            .collect()
    }

    /// The next unit to move on `channel`, or `None` when the channel is idle.
    pub fn pending_transfer(&self, channel: usize) -> Option<DmaTransfer> {
        let ch = self.channels.get(channel)?;
        if !ch.enabled() || ch.remaining == 0 {
            return None;
        }
        Some(DmaTransfer {
            source: ch.current_source as u32,
            destination: ch.current_destination as u32,
            source_mode: ch.source_mode(),
            destination_mode: ch.destination_mode(),
        })
    }

    /// Commits a transfer the bus completed. Returns `true` while a block
    /// transfer should keep going within the same trigger.
    pub fn complete_transfer(&mut self, channel: usize, ctx: &mut IoContext) -> bool {
        let Some(ch) = self.channels.get_mut(channel) else {
            return false;
        };
        let src_incr = (ch.ctl >> 8) & 0x3;
        let dst_incr = (ch.ctl >> 10) & 0x3;
        ch.current_source = advance(ch.current_source, src_incr, ch.source_mode());
        ch.current_destination = advance(ch.current_destination, dst_incr, ch.destination_mode());
        ch.remaining = ch.remaining.saturating_sub(1);
        ch.transfers += 1;

        if ch.remaining > 0 {
            return ch.block();
        }

        ch.reload();
        if !ch.repeat() {
            ch.ctl &= !DMAEN;
        }
        ch.ifg = true;
        let request = ch.interrupt_enabled();
        self.mux.update_interrupt(request, channel as u8, ctx);
        self.chip
            .log(&format!("channel {} pass complete at cycle {}", channel, ctx.cycles()));
        false
    }

    pub fn channel_enabled(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(DmaChannel::enabled)
    }

    pub fn channel_ifg(&self, channel: usize) -> bool {
        self.channels.get(channel).is_some_and(|c| c.ifg)
    }

    pub fn channel_transfers(&self, channel: usize) -> u64 {
        self.channels.get(channel).map_or(0, |c| c.transfers)
    }

    /// Word value of the register containing `address`.
    fn register(&self, address: u32) -> Option<u16> {
        let address = address & !1;
        if address == self.control_base {
            return Some(self.dmactl0);
        }
        if address == self.control_base + 2 {
            return Some(self.dmactl1);
        }
        let offset = address.checked_sub(self.channel_base)?;
        let ch = self.channels.get((offset / CHANNEL_STRIDE) as usize)?;
        Some(match offset % CHANNEL_STRIDE {
            0 => ch.read_ctl(),
            2 => ch.source,
            4 => ch.destination,
            _ => ch.size,
        })
    }

    fn write_ctl(&mut self, channel: usize, value: u16, ctx: &mut IoContext) {
        let select = self.select(channel);
        let ch = &mut self.channels[channel];
        let was_enabled = ch.enabled();
        ch.ifg = value & DMAIFG != 0;
        ch.ctl = value & !(DMAREQ | DMAABORT);
        if !was_enabled && ch.enabled() {
            ch.reload();
            self.chip.log(&format!(
                "channel {} enabled: {:#06x} -> {:#06x} x{}",
                channel, ch.source, ch.destination, ch.size
            ));
        }
        let request = ch.ifg && ch.interrupt_enabled();
        let software = value & DMAREQ != 0 && ch.enabled() && select == 0;
        self.mux.update_interrupt(request, channel as u8, ctx);

        if software {
            self.unit = Some(ctx.unit());
            ctx.trigger_dma(channel as u8);
        }
    }
}

impl IoUnit for Dma {
    fn chip(&self) -> &ChipCore {
        &self.chip
    }

    fn chip_mut(&mut self) -> &mut ChipCore {
        &mut self.chip
    }

    fn read(&mut self, address: u32, mode: AccessMode, _ctx: &mut IoContext) -> SimResult<u16> {
        match self.register(address) {
            Some(word) if mode == AccessMode::Byte => Ok(select_byte(word, address)),
            Some(word) => Ok(word),
            None => {
                self.chip.logw(
                    WarningKind::VoidIoRead,
                    &format!("read from undefined register {:#06x}", address),
                )?;
                Ok(0)
            }
        }
    }

    fn write(
        &mut self,
        address: u32,
        value: u16,
        mode: AccessMode,
        ctx: &mut IoContext,
    ) -> SimResult<()> {
        let Some(old) = self.register(address) else {
            return self.chip.logw(
                WarningKind::VoidIoWrite,
                &format!("write of {:#x} to undefined register {:#06x}", value, address),
            );
        };
        let value = if mode == AccessMode::Byte {
            merge_byte(old, address, value)
        } else {
            value
        };
        let address = address & !1;

        if address == self.control_base {
            let old = self.dmactl0;
            self.dmactl0 = value & 0x0FFF;
            self.chip
                .configuration_changed(0, old as i32, self.dmactl0 as i32);
            return Ok(());
        }
        if address == self.control_base + 2 {
            self.dmactl1 = value & 0x0007;
            return Ok(());
        }

        let offset = address - self.channel_base;
        let channel = (offset / CHANNEL_STRIDE) as usize;
        match offset % CHANNEL_STRIDE {
            0 => self.write_ctl(channel, value, ctx),
            2 => self.channels[channel].source = value,
            4 => self.channels[channel].destination = value,
            _ => self.channels[channel].size = value,
        }
        Ok(())
    }

    fn peek(&self, address: u32) -> Option<u16> {
        self.register(address)
    }

    fn reset(&mut self) {
        self.dmactl0 = 0;
        self.dmactl1 = 0;
        self.channels = Default::default();
        self.mux.reset();
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{EmulationLogger, WarningMode};
    use crate::IoEffect;

    const CTL0: u32 = 0x122;
    const CH0: u32 = 0x1E0;

    fn dma() -> Dma {
        Dma::new(
            ChipCore::new("dma", EmulationLogger::shared(WarningMode::Raise)),
            CTL0,
            CH0,
            0,
        )
    }

    fn w(d: &mut Dma, addr: u32, value: u16, ctx: &mut IoContext) {
        d.write(addr, value, AccessMode::Word, ctx).unwrap();
    }

    fn r(d: &mut Dma, addr: u32, ctx: &mut IoContext) -> u16 {
        d.read(addr, AccessMode::Word, ctx).unwrap()
    }

    #[test]
    fn test_register_round_trip_reflects_ifg_state() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        let ctl = (INCR_INC << 10) | (INCR_INC << 8) | DMASRCBYTE | DMADSTBYTE | DMAIE;

        w(&mut d, CH0 + 8, ctl | DMAIFG, &mut ctx);
        w(&mut d, CH0 + 10, 0x0200, &mut ctx);
        w(&mut d, CH0 + 12, 0x0300, &mut ctx);
        w(&mut d, CH0 + 14, 17, &mut ctx);

        assert_eq!(r(&mut d, CH0 + 8, &mut ctx), ctl | DMAIFG);
        assert_eq!(r(&mut d, CH0 + 10, &mut ctx), 0x0200);
        assert_eq!(r(&mut d, CH0 + 12, &mut ctx), 0x0300);
        assert_eq!(r(&mut d, CH0 + 14, &mut ctx), 17);

        // Clearing IFG with a read-modify-write leaves the other bits alone
        w(&mut d, CH0 + 8, ctl, &mut ctx);
        assert_eq!(r(&mut d, CH0 + 8, &mut ctx), ctl);
    }

    #[test]
    fn test_configured_registers_do_not_disturb_in_flight() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CH0 + 2, 0x0200, &mut ctx);
        w(&mut d, CH0 + 4, 0x0300, &mut ctx);
        w(&mut d, CH0 + 6, 4, &mut ctx);
        let ctl = (INCR_INC << 10) | (INCR_INC << 8) | DMASRCBYTE | DMADSTBYTE | DMAEN;
        w(&mut d, CH0, ctl, &mut ctx);

        d.complete_transfer(0, &mut ctx);
        w(&mut d, CH0 + 2, 0x0400, &mut ctx);
        w(&mut d, CH0 + 6, 9, &mut ctx);

        let t = d.pending_transfer(0).unwrap();
        assert_eq!(t.source, 0x0201);
        assert_eq!(t.destination, 0x0301);
        assert_eq!(r(&mut d, CH0 + 2, &mut ctx), 0x0400);

        // Disable and re-enable picks up the new configuration
        w(&mut d, CH0, ctl & !DMAEN, &mut ctx);
        w(&mut d, CH0, ctl, &mut ctx);
        let t = d.pending_transfer(0).unwrap();
        assert_eq!(t.source, 0x0400);
    }

    #[test]
    fn test_disabled_channel_has_no_transfer() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CH0 + 6, 4, &mut ctx);
        assert!(d.pending_transfer(0).is_none());
        assert!(d.pending_transfer(7).is_none());
    }

    #[test]
    fn test_single_transfers_raise_one_interrupt_per_pass() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CH0 + 2, 0x0200, &mut ctx);
        w(&mut d, CH0 + 4, 0x0300, &mut ctx);
        w(&mut d, CH0 + 6, 4, &mut ctx);
        let ctl = (INCR_INC << 10) | (INCR_INC << 8) | DMASRCBYTE | DMADSTBYTE | DMAIE | DMAEN;
        w(&mut d, CH0, ctl, &mut ctx);
        assert!(ctx.effects().is_empty());

        let mut effects = Vec::new();
        for i in 0..4u32 {
            let mut ctx = IoContext::new(UnitId(0), 0);
            w(&mut d, CH0, ctl | DMAREQ, &mut ctx);
            assert_eq!(ctx.effects(), &[IoEffect::DmaTrigger { index: 0 }]);

            let t = d.pending_transfer(0).unwrap();
            assert_eq!(t.source, 0x0200 + i);
            assert_eq!(t.destination, 0x0300 + i);
            assert_eq!(t.source_mode, AccessMode::Byte);
            assert!(!d.complete_transfer(0, &mut ctx));
            effects.extend(ctx.into_effects().into_iter().skip(1));
        }

        assert_eq!(effects, vec![IoEffect::Interrupt { vector: 0, active: true }]);
        assert!(!d.channel_enabled(0));
        assert!(d.channel_ifg(0));
        assert_eq!(d.channel_transfers(0), 4);
        assert!(d.pending_transfer(0).is_none());
    }

    #[test]
    fn test_word_decrement_moves_two_bytes() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CH0 + 2, 0x0210, &mut ctx);
        w(&mut d, CH0 + 4, 0x0310, &mut ctx);
        w(&mut d, CH0 + 6, 3, &mut ctx);
        w(&mut d, CH0, (INCR_DEC << 10) | (INCR_NONE << 8) | DMAEN, &mut ctx);
        d.complete_transfer(0, &mut ctx);
        let t = d.pending_transfer(0).unwrap();
        assert_eq!(t.source, 0x0210);
        assert_eq!(t.destination, 0x030E);
        assert_eq!(t.source_mode, AccessMode::Word);
    }

    #[test]
    fn test_repeat_mode_reloads_and_stays_enabled() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CH0 + 2, 0x0200, &mut ctx);
        w(&mut d, CH0 + 6, 2, &mut ctx);
        let ctl = (DT_REPEAT << 12) | (INCR_INC << 8) | DMASRCBYTE | DMADSTBYTE | DMAEN | DMAIE;
        w(&mut d, CH0, ctl, &mut ctx);
        let _ = ctx.into_effects();

        let mut ctx = IoContext::new(UnitId(0), 0);
        d.complete_transfer(0, &mut ctx);
        d.complete_transfer(0, &mut ctx);
        assert!(d.channel_enabled(0));
        assert!(d.channel_ifg(0));
        assert_eq!(d.pending_transfer(0).unwrap().source, 0x0200);
        assert_eq!(
            ctx.effects(),
            &[IoEffect::Interrupt {
                vector: 0,
                active: true
            }]
        );
    }

    #[test]
    fn test_software_request_needs_select_zero() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(5), 0);
        w(&mut d, CH0 + 6, 1, &mut ctx);
        w(&mut d, CH0, DMAEN | DMAREQ, &mut ctx);
        assert_eq!(ctx.effects(), &[IoEffect::DmaTrigger { index: 0 }]);
        // DMAREQ self-clears
        assert_eq!(r(&mut d, CH0, &mut ctx) & DMAREQ, 0);
        assert_eq!(
            d.channels_for(TriggerSource {
                unit: UnitId(5),
                index: 0
            }),
            vec![0]
        );

        let mut ctx = IoContext::new(UnitId(5), 0);
        w(&mut d, CTL0, 0x0003, &mut ctx); // channel 0 now selects trigger 3
        w(&mut d, CH0, DMAEN | DMAREQ, &mut ctx);
        assert!(ctx.effects().is_empty());
    }

    #[test]
    fn test_trigger_binding() {
        let mut d = dma();
        let uart = TriggerSource {
            unit: UnitId(2),
            index: 1,
        };
        d.bind_trigger(4, uart).unwrap();
        assert!(d.bind_trigger(0, uart).is_err());
        assert!(d.bind_trigger(16, uart).is_err());

        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CTL0, 0x0404, &mut ctx); // channels 0 and 2 on trigger 4
        assert_eq!(d.channels_for(uart), vec![0, 2]);
        assert!(d
            .channels_for(TriggerSource {
                unit: UnitId(2),
                index: 0
            })
            .is_empty());
    }

    #[test]
    fn test_byte_access_merges_into_word_register() {
        let mut d = dma();
        let mut ctx = IoContext::new(UnitId(0), 0);
        w(&mut d, CH0 + 2, 0x1234, &mut ctx);
        d.write(CH0 + 3, 0xAB, AccessMode::Byte, &mut ctx).unwrap();
        assert_eq!(r(&mut d, CH0 + 2, &mut ctx), 0xAB34);
        assert_eq!(d.read(CH0 + 2, AccessMode::Byte, &mut ctx).unwrap(), 0x34);
    }
}
