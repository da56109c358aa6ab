//! .NET solution scaffolding: `.sln`, main and test `.csproj`, ignores, README.

use sha2::{Digest, Sha256};

const CSHARP_PROJECT_TYPE: &str = "FAE04EC0-301F-11D3-BF4B-00C04F79EFBC";

/// Keep `[A-Za-z0-9_.]`; names must start with a letter.
pub(super) fn sanitize_name(raw: &str) -> String {
    let name: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    match name.chars().next() {
        None => "GeneratedApp".to_string(),
        Some(c) if !c.is_ascii_alphabetic() => format!("App{name}"),
        Some(_) => name,
    }
}

/// Deterministic project GUID derived from the project name and its role.
fn project_guid(name: &str, role: &str) -> String {
    let digest = Sha256::digest(format!("{name}/{role}").as_bytes());
    let mut b = [0u8; 16];
    b.copy_from_slice(&digest[..16]);
    // Name-based UUID layout (version 5, RFC 4122 variant).
    b[6] = (b[6] & 0x0f) | 0x50;
    b[8] = (b[8] & 0x3f) | 0x80;
    let hex: String = b.iter().map(|byte| format!("{byte:02X}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

pub(super) fn solution(name: &str) -> String {
    let main = project_guid(name, "main");
    let tests = project_guid(name, "tests");
    let kind = CSHARP_PROJECT_TYPE;

    let mut configs = String::new();
    for guid in [&main, &tests] {
        for cfg in ["Debug", "Release"] {
            configs.push_str(&format!(
                "\t\t{{{guid}}}.{cfg}|Any CPU.ActiveCfg = {cfg}|Any CPU\n\
                 \t\t{{{guid}}}.{cfg}|Any CPU.Build.0 = {cfg}|Any CPU\n"
            ));
        }
    }

    format!(
        "Microsoft Visual Studio Solution File, Format Version 12.00\n\
         # Visual Studio Version 17\n\
         VisualStudioVersion = 17.0.31903.59\n\
         MinimumVisualStudioVersion = 10.0.40219.1\n\
         Project(\"{{{kind}}}\") = \"{name}\", \"{name}\\{name}.csproj\", \"{{{main}}}\"\n\
         EndProject\n\
         Project(\"{{{kind}}}\") = \"{name}.Tests\", \"{name}.Tests\\{name}.Tests.csproj\", \"{{{tests}}}\"\n\
         EndProject\n\
         Global\n\
         \tGlobalSection(SolutionConfigurationPlatforms) = preSolution\n\
         \t\tDebug|Any CPU = Debug|Any CPU\n\
         \t\tRelease|Any CPU = Release|Any CPU\n\
         \tEndGlobalSection\n\
         \tGlobalSection(ProjectConfigurationPlatforms) = postSolution\n\
         {configs}\
         \tEndGlobalSection\n\
         \tGlobalSection(SolutionProperties) = preSolution\n\
         \t\tHideSolutionNode = FALSE\n\
         \tEndGlobalSection\n\
         EndGlobal\n"
    )
}

pub(super) fn project_file(target_framework: &str) -> String {
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">

  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>{target_framework}</TargetFramework>
    <ImplicitUsings>disable</ImplicitUsings>
    <Nullable>enable</Nullable>
    <GenerateDocumentationFile>true</GenerateDocumentationFile>
  </PropertyGroup>

</Project>
"#
    )
}

pub(super) fn test_project_file(name: &str, target_framework: &str) -> String {
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">

  <PropertyGroup>
    <TargetFramework>{target_framework}</TargetFramework>
    <ImplicitUsings>disable</ImplicitUsings>
    <Nullable>enable</Nullable>
    <IsPackable>false</IsPackable>
  </PropertyGroup>

  <ItemGroup>
    <PackageReference Include="Microsoft.NET.Test.Sdk" Version="17.8.0" />
    <PackageReference Include="NUnit" Version="3.14.0" />
    <PackageReference Include="NUnit3TestAdapter" Version="4.5.0" />
    <PackageReference Include="Moq" Version="4.20.70" />
    <PackageReference Include="coverlet.collector" Version="6.0.0">
      <IncludeAssets>runtime; build; native; contentfiles; analyzers; buildtransitive</IncludeAssets>
      <PrivateAssets>all</PrivateAssets>
    </PackageReference>
  </ItemGroup>

  <ItemGroup>
    <ProjectReference Include="..\{name}\{name}.csproj" />
  </ItemGroup>

</Project>
"#
    )
}

pub(super) const GITIGNORE: &str = "\
## .NET
.vs/
*.user
*.suo
bin/
obj/
*.dll
*.exe
*.pdb

# NuGet
*.nupkg
packages/

# Test results
TestResults/
*.trx

# Build results
[Dd]ebug/
[Rr]elease/

# IDE
.idea/
*.swp
";

pub(super) fn readme(name: &str) -> String {
    format!(
        r#"# {name}

Generated by agent-team.

## Build and run

```bash
dotnet build {name}.sln
dotnet run --project {name}/{name}.csproj
dotnet test {name}.sln
```

## Layout

```
{name}.sln
{name}/            main project
{name}.Tests/      NUnit test project
```
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_is_uuid_shaped() {
        let guid = project_guid("Calc", "main");
        assert_eq!(guid.len(), 36);
        assert_eq!(guid.as_bytes()[14], b'5');
        assert_ne!(guid, project_guid("Calc", "tests"));
    }

    #[test]
    fn solution_references_both_projects() {
        let sln = solution("Calc");
        assert!(sln.contains(r#""Calc", "Calc\Calc.csproj""#));
        assert!(sln.contains(r#""Calc.Tests", "Calc.Tests\Calc.Tests.csproj""#));
        assert_eq!(sln.matches("Build.0").count(), 4);
    }
}
