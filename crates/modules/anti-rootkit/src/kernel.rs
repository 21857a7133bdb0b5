use bpf_common::{Probe, ProbeSet, parsing::RawDecoder};
use kestrel_core::{
    event::{KernelReadFile, ModuleLoad, Payload, UsermodeHelper},
    pdk::{DecodeState, EventError, ExeSource, KernelEvent, Verdict},
};

/// `do_init_module`: a kernel module is being loaded.
#[derive(Debug, Default)]
pub struct ModuleInit(pub ModuleLoad);

impl KernelEvent for ModuleInit {
    fn id(&self) -> u32 {
        1026
    }

    fn name(&self) -> &'static str {
        "do_init_module"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        _state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let module = &mut self.0;
        module.modname = decoder.read_string()?;
        module.exe = decoder.read_string()?;
        module.pid_tree = decoder.read_pid_tree()?.to_string();
        module.cwd = decoder.read_string()?;
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new().kprobe("do_init_module").build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::ModuleLoad(self.0)
    }

    fn as_exe_source(&self) -> Option<&dyn ExeSource> {
        Some(self)
    }
}

impl ExeSource for ModuleInit {
    fn exe(&self) -> &str {
        &self.0.exe
    }
}

/// Name of a value of `enum kernel_read_file_id`.
fn read_file_type(type_id: i32) -> &'static str {
    match type_id {
        1 => "firmware",
        2 => "kernel-module",
        3 => "kexec-image",
        4 => "kexec-initramfs",
        5 => "security-policy",
        6 => "x509-certificate",
        _ => "unknown",
    }
}

/// `security_kernel_read_file`: the kernel reads a file on behalf of user
/// space (modules, firmware, kexec images).
#[derive(Debug, Default)]
pub struct KernelFileRead(pub KernelReadFile);

impl KernelEvent for KernelFileRead {
    fn id(&self) -> u32 {
        1027
    }

    fn name(&self) -> &'static str {
        "security_kernel_read_file"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        _state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let read = &mut self.0;
        read.filename = decoder.read_string()?;
        decoder.read_index()?;
        read.type_id = decoder.read_i32()?;
        read.read_type = read_file_type(read.type_id).to_string();
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new().kprobe("security_kernel_read_file").build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::KernelReadFile(self.0)
    }
}

/// `call_usermodehelper`: the kernel spawns a user space process.
#[derive(Debug, Default)]
pub struct UsermodeHelperCall(pub UsermodeHelper);

impl KernelEvent for UsermodeHelperCall {
    fn id(&self) -> u32 {
        1028
    }

    fn name(&self) -> &'static str {
        "call_usermodehelper"
    }

    fn decode(
        &mut self,
        decoder: &mut RawDecoder,
        _state: &DecodeState,
    ) -> Result<Verdict, EventError> {
        let helper = &mut self.0;
        helper.path = decoder.read_string()?;
        helper.argv = decoder.read_str_array()?.join(" ");
        helper.envp = decoder.read_str_array()?.join(" ");
        decoder.read_index()?;
        helper.wait = decoder.read_i32()?;
        helper.exe = decoder.read_string()?;
        Ok(Verdict::Emit)
    }

    fn probes(&self) -> Vec<Probe> {
        ProbeSet::new().kprobe("call_usermodehelper").build()
    }

    fn into_payload(self: Box<Self>) -> Payload {
        Payload::UsermodeHelper(self.0)
    }

    fn as_exe_source(&self) -> Option<&dyn ExeSource> {
        Some(self)
    }
}

impl ExeSource for UsermodeHelperCall {
    fn exe(&self) -> &str {
        &self.0.exe
    }
}
