//! Eltwise primitive descriptor: decide whether one (ISA, element type)
//! implementation can serve a descriptor, before any code is emitted.

use crate::compiler::codegen::injector;
use crate::compiler::{KernelConf, TargetDesc};
use crate::desc::{is_zero_preserved, EltwiseDesc, PrimitiveAttr, PropKind};
use crate::dispatch::Isa;
use crate::memory::{Layout, MemoryDesc};
use crate::types::{DType, JitError, JitResult};

use super::Engine;

/// Forward implementations in preference order.
const FWD_IMPLS: &[(Isa, DType)] = &[
    (Isa::Sve, DType::F32),
    (Isa::Sve, DType::BF16),
    (Isa::Sve, DType::F16),
    (Isa::Asimd, DType::F32),
    (Isa::Asimd, DType::BF16),
    (Isa::Asimd, DType::F16),
];

/// Backward is instantiated for f32 only.
const BWD_IMPLS: &[(Isa, DType)] = &[(Isa::Sve, DType::F32), (Isa::Asimd, DType::F32)];

pub fn impl_list(prop: PropKind) -> &'static [(Isa, DType)] {
    match prop {
        PropKind::Forward => FWD_IMPLS,
        PropKind::Backward => BWD_IMPLS,
    }
}

#[derive(Debug, Clone)]
pub struct EltwisePd {
    /// Descriptor with `Any` layouts resolved.
    desc: EltwiseDesc,
    prop: PropKind,
    dtype: DType,
    target: TargetDesc,
}

fn unimpl(rule: &str) -> JitError {
    JitError::Unimplemented(rule.to_string())
}

impl EltwisePd {
    /// Check every rule for the (`isa`, `dtype`, `prop`) implementation.
    /// The first failing rule is returned as `Unimplemented`.
    pub fn init(
        engine: &Engine,
        desc: &EltwiseDesc,
        attr: &PrimitiveAttr,
        prop: PropKind,
        isa: Isa,
        dtype: DType,
    ) -> JitResult<Self> {
        let caps = engine.caps();
        if !caps.mayiuse(isa) {
            return Err(unimpl(&format!("isa {isa} not available ({caps})")));
        }
        let target = TargetDesc::from_caps(caps, isa)
            .ok_or_else(|| unimpl(&format!("isa {isa} not available")))?;

        if desc.prop != prop {
            return Err(unimpl("propagation kind mismatch"));
        }
        if prop == PropKind::Backward && dtype != DType::F32 {
            return Err(unimpl(&format!("backward is not implemented for {dtype}")));
        }

        let mut desc = desc.clone();
        set_default_formats(&mut desc);

        if !desc.tensors().all(|md| md.dtype == dtype) {
            return Err(unimpl(&format!("element types differ from {dtype}")));
        }
        if desc.tensors().any(|md| md.has_zero_dim()) {
            return Err(unimpl("zero-extent dimension"));
        }
        let data = &desc.data_md;
        if !data.is_dense(true) {
            return Err(unimpl("data layout is not dense"));
        }
        if !injector::is_supported(isa, desc.alg) {
            return Err(unimpl(&format!("algorithm {} not supported on {isa}", desc.alg)));
        }
        if !data.is_dense(false) && !is_zero_preserved(prop, desc.alg, desc.alpha, desc.beta) {
            return Err(unimpl(&format!(
                "padded layout requires a zero-preserving algorithm, {} is not",
                desc.alg
            )));
        }
        if prop == PropKind::Backward
            && desc.use_dst
            && !injector::is_use_dst_supported(desc.alg, desc.alpha)
        {
            return Err(unimpl(&format!("use_dst not supported for {}", desc.alg)));
        }
        if !attr.has_default_values() {
            return Err(unimpl("non-default attributes"));
        }
        match prop {
            PropKind::Forward => {
                if desc.data_md != desc.dst_md {
                    return Err(unimpl("src and dst descriptors differ"));
                }
            }
            PropKind::Backward => {
                let same = desc.diff_dst_md.as_ref().is_some_and(|dd| *dd == desc.data_md && *dd == desc.dst_md);
                if !same {
                    return Err(unimpl("data, diff_src and diff_dst descriptors differ"));
                }
            }
        }

        Ok(EltwisePd { desc, prop, dtype, target })
    }

    pub fn desc(&self) -> &EltwiseDesc {
        &self.desc
    }

    pub fn prop(&self) -> PropKind {
        self.prop
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn target(&self) -> TargetDesc {
        self.target
    }

    /// Implementation name, e.g. `jit:sve_256:bf16`.
    pub fn name(&self) -> String {
        match self.target.isa {
            Isa::Asimd => format!("jit:asimd:{}", self.dtype),
            Isa::Sve => format!("jit:sve_{}:{}", self.target.vlen * 8, self.dtype),
        }
    }

    /// Elements processed per execution, padding included.
    pub fn nelems(&self) -> usize {
        self.desc.data_md.nelems(true)
    }

    pub fn kernel_conf(&self) -> KernelConf {
        KernelConf {
            target: self.target,
            dtype: self.dtype,
            prop: self.prop,
            alg: self.desc.alg,
            alpha: self.desc.alpha,
            beta: self.desc.beta,
            use_dst: self.desc.use_dst,
        }
    }
}

/// Resolve `Layout::Any`: the data tensor defaults to plain, the others
/// follow the data tensor.
fn set_default_formats(desc: &mut EltwiseDesc) {
    if desc.data_md.is_any() {
        desc.data_md.layout = Layout::Plain;
    }
    let follow = |md: &mut MemoryDesc, from: &Layout| {
        if md.is_any() {
            md.layout = from.clone();
        }
    };
    let data_layout = desc.data_md.layout.clone();
    follow(&mut desc.dst_md, &data_layout);
    if let Some(dd) = desc.diff_dst_md.as_mut() {
        follow(dd, &data_layout);
    }
}
