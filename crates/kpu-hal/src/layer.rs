// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The 12-word layer descriptor pushed into the configuration FIFO.

use crate::regs::LAYER_ARGUMENT_WORDS;

register_word! {
    InterruptEnable {
        int_en: 1 @ 0,
        ram_flag: 1 @ 1,
        full_add: 1 @ 2,
        depth_wise_layer: 1 @ 3,
    }
}

register_word! {
    /// Source and destination image addresses, in I/O memory rows.
    ImageAddr {
        image_src_addr: 15 @ 0,
        image_dst_addr: 15 @ 32,
    }
}

register_word! {
    /// Channel counts, each stored minus one.
    ImageChannelNum {
        i_ch_num: 10 @ 0,
        o_ch_num: 10 @ 32,
        /// Output channels whose kernels fit one kernel-cache load.
        o_ch_num_coef: 10 @ 48,
    }
}

register_word! {
    /// Image extents, each stored minus one.
    ImageSize {
        i_row_wid: 10 @ 0,
        i_col_high: 9 @ 10,
        o_row_wid: 10 @ 32,
        o_col_high: 9 @ 42,
    }
}

register_word! {
    KernelPoolTypeCfg {
        /// 0 = 1x1, 1 = 3x3.
        kernel_type: 3 @ 0,
        pad_type: 1 @ 3,
        /// 0 = none, 6 = stride-2 subsampling of the convolution output.
        pool_type: 4 @ 4,
        first_stride: 1 @ 8,
        bypass_conv: 1 @ 9,
        load_para: 1 @ 10,
        dma_burst_size: 8 @ 16,
        pad_value: 8 @ 24,
        /// Device address of the batch-norm table.
        bwsx_base_addr: 32 @ 32,
    }
}

register_word! {
    KernelLoadCfg {
        load_coor: 1 @ 0,
        /// Kernel-cache loads, minus one.
        load_time: 6 @ 1,
        /// Bytes per kernel-cache load.
        para_size: 17 @ 15,
        para_start_addr: 32 @ 32,
    }
}

register_word! {
    KernelOffset {
        coef_column_offset: 4 @ 0,
        coef_row_offset: 12 @ 4,
    }
}

register_word! {
    /// Read-side layout of the input image in I/O memory.
    KernelCalcTypeCfg {
        channel_switch_addr: 15 @ 0,
        row_switch_addr: 4 @ 16,
        coef_size: 8 @ 20,
        coef_group: 3 @ 28,
        load_act: 1 @ 31,
        /// Device address of the activation table.
        active_addr: 32 @ 32,
    }
}

register_word! {
    /// Write-side layout of the output image in I/O memory.
    WriteBackCfg {
        wb_channel_switch_addr: 15 @ 0,
        wb_row_switch_addr: 4 @ 16,
        wb_group: 3 @ 20,
    }
}

register_word! {
    /// Zero-point correction terms: `arg_w` scales the kernel sum,
    /// `arg_x` scales the input window sum.
    ConvValue {
        shr_w: 4 @ 0,
        shr_x: 4 @ 4,
        arg_w: 24 @ 8,
        arg_x: 24 @ 32,
    }
}

register_word! {
    ConvValue2 {
        arg_add: 40 @ 0,
    }
}

register_word! {
    DmaParameter {
        send_data_out: 1 @ 0,
        /// Bytes per output channel, minus one.
        channel_byte_num: 16 @ 16,
        /// Bytes of the whole output, minus one.
        dma_total_byte: 32 @ 32,
    }
}

/// One convolution layer as the KPU reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerArgument {
    pub interrupt_enable: InterruptEnable,
    pub image_addr: ImageAddr,
    pub image_channel_num: ImageChannelNum,
    pub image_size: ImageSize,
    pub kernel_pool_type_cfg: KernelPoolTypeCfg,
    pub kernel_load_cfg: KernelLoadCfg,
    pub kernel_offset: KernelOffset,
    pub kernel_calc_type_cfg: KernelCalcTypeCfg,
    pub write_back_cfg: WriteBackCfg,
    pub conv_value: ConvValue,
    pub conv_value2: ConvValue2,
    pub dma_parameter: DmaParameter,
}

impl LayerArgument {
    /// The descriptor words in configuration-FIFO order.
    pub fn words(&self) -> [u64; LAYER_ARGUMENT_WORDS] {
        [
            self.interrupt_enable.to_word(),
            self.image_addr.to_word(),
            self.image_channel_num.to_word(),
            self.image_size.to_word(),
            self.kernel_pool_type_cfg.to_word(),
            self.kernel_load_cfg.to_word(),
            self.kernel_offset.to_word(),
            self.kernel_calc_type_cfg.to_word(),
            self.write_back_cfg.to_word(),
            self.conv_value.to_word(),
            self.conv_value2.to_word(),
            self.dma_parameter.to_word(),
        ]
    }

    /// Rebuilds a descriptor from words in FIFO order.
    pub fn from_words(w: &[u64; LAYER_ARGUMENT_WORDS]) -> Self {
        Self {
            interrupt_enable: InterruptEnable::from_word(w[0]),
            image_addr: ImageAddr::from_word(w[1]),
            image_channel_num: ImageChannelNum::from_word(w[2]),
            image_size: ImageSize::from_word(w[3]),
            kernel_pool_type_cfg: KernelPoolTypeCfg::from_word(w[4]),
            kernel_load_cfg: KernelLoadCfg::from_word(w[5]),
            kernel_offset: KernelOffset::from_word(w[6]),
            kernel_calc_type_cfg: KernelCalcTypeCfg::from_word(w[7]),
            write_back_cfg: WriteBackCfg::from_word(w[8]),
            conv_value: ConvValue::from_word(w[9]),
            conv_value2: ConvValue2::from_word(w[10]),
            dma_parameter: DmaParameter::from_word(w[11]),
        }
    }

    /// Output bytes the device streams out (`dma_total_byte + 1`).
    pub fn output_bytes(&self) -> usize {
        self.dma_parameter.dma_total_byte as usize + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_size_layout() {
        let s = ImageSize {
            i_row_wid: 7,
            i_col_high: 7,
            o_row_wid: 3,
            o_col_high: 3,
        };
        let w = s.to_word();
        assert_eq!(w & 0x3FF, 7);
        assert_eq!((w >> 10) & 0x1FF, 7);
        assert_eq!((w >> 32) & 0x3FF, 3);
        assert_eq!((w >> 42) & 0x1FF, 3);
    }

    #[test]
    fn test_kernel_pool_type_layout() {
        let k = KernelPoolTypeCfg {
            kernel_type: 1,
            pool_type: 6,
            load_para: 1,
            dma_burst_size: 15,
            pad_value: 0x80,
            bwsx_base_addr: 0x1234_5678,
            ..Default::default()
        };
        assert_eq!(k.to_word(), 0x1234_5678_800F_0461);
    }

    #[test]
    fn test_negative_offsets_truncate() {
        let c = ConvValue {
            arg_w: (-3i64) as u64,
            arg_x: 5,
            ..Default::default()
        };
        let w = c.to_word();
        assert_eq!((w >> 8) & 0xFF_FFFF, 0xFF_FFFD);
        assert_eq!(w >> 32, 5);
    }

    #[test]
    fn test_words_in_fifo_order() {
        let layer = LayerArgument {
            interrupt_enable: InterruptEnable {
                int_en: 1,
                ..Default::default()
            },
            dma_parameter: DmaParameter {
                send_data_out: 1,
                channel_byte_num: 35,
                dma_total_byte: 143,
            },
            ..Default::default()
        };
        let words = layer.words();
        assert_eq!(words[0], 1);
        assert_eq!(words[11], (143u64 << 32) | (35 << 16) | 1);
        assert_eq!(LayerArgument::from_words(&words), layer);
        assert_eq!(layer.output_bytes(), 144);
    }
}
