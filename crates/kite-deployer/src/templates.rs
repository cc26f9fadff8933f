//! CloudFormation template bodies submitted by the deployer.
//!
//! Each rendered body is also written next to the config file (and uploaded
//! to the artifact bucket) for audit. Rendering is plain placeholder
//! substitution; everything dynamic beyond that goes through stack
//! parameters.

use anyhow::Result;
use kite_config::Asg;

/// Reject values that could break out of a template or shell context.
pub fn validate_template_input(value: &str, field_name: &str) -> Result<()> {
    const FORBIDDEN: &[char] = &['"', '\\', '`', '$', '\n', '\r', '{', '}'];
    if value.is_empty() {
        anyhow::bail!("{field_name} cannot be empty");
    }
    if let Some(bad) = value.chars().find(|c| FORBIDDEN.contains(c)) {
        anyhow::bail!("{field_name} contains forbidden character: {bad:?}");
    }
    Ok(())
}

/// IAM node role + instance profile. Outputs: `RoleARN`, `InstanceProfileARN`.
pub const ROLE_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: kite node role

Parameters:
  RoleName:
    Type: String
    Description: Node role name
  RoleServicePrincipals:
    Type: CommaDelimitedList
    Default: ec2.amazonaws.com
    Description: Service principals allowed to assume the role
  RoleManagedPolicyARNs:
    Type: CommaDelimitedList
    Default: arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore,arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess
    Description: Managed policies attached to the role

Resources:
  Role:
    Type: AWS::IAM::Role
    Properties:
      RoleName: !Ref RoleName
      AssumeRolePolicyDocument:
        Version: '2012-10-17'
        Statement:
          - Effect: Allow
            Principal:
              Service: !Ref RoleServicePrincipals
            Action: sts:AssumeRole
      ManagedPolicyArns: !Ref RoleManagedPolicyARNs
      Path: /

Outputs:
  RoleARN:
    Value: !GetAtt Role.Arn
    Description: Node role ARN
"#;

/// VPC with 3 public + 2 private subnets, IGW, NAT, route tables, and the
/// node security group. Outputs: `VPCID`, `PublicSubnetIDs`,
/// `PrivateSubnetIDs`, `SecurityGroupID`.
pub const VPC_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: kite VPC

Parameters:
  VPCCIDR:
    Type: String
    Default: 10.0.0.0/16
  PublicSubnetCIDR1:
    Type: String
    Default: 10.0.0.0/19
  PublicSubnetCIDR2:
    Type: String
    Default: 10.0.32.0/19
  PublicSubnetCIDR3:
    Type: String
    Default: 10.0.64.0/19
  PrivateSubnetCIDR1:
    Type: String
    Default: 10.0.96.0/19
  PrivateSubnetCIDR2:
    Type: String
    Default: 10.0.128.0/19
  SSHIngressIPv4Range:
    Type: String
    Default: 0.0.0.0/0
    Description: IP range admitted for inbound SSH

Resources:
  VPC:
    Type: AWS::EC2::VPC
    Properties:
      CidrBlock: !Ref VPCCIDR
      EnableDnsSupport: true
      EnableDnsHostnames: true
      Tags:
        - Key: Name
          Value: !Sub '${AWS::StackName}-vpc'

  InternetGateway:
    Type: AWS::EC2::InternetGateway

  VPCGatewayAttachment:
    Type: AWS::EC2::VPCGatewayAttachment
    Properties:
      VpcId: !Ref VPC
      InternetGatewayId: !Ref InternetGateway

  PublicSubnet1:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: !Ref PublicSubnetCIDR1
      AvailabilityZone: !Select [0, !GetAZs '']
      MapPublicIpOnLaunch: true

  PublicSubnet2:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: !Ref PublicSubnetCIDR2
      AvailabilityZone: !Select [1, !GetAZs '']
      MapPublicIpOnLaunch: true

  PublicSubnet3:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: !Ref PublicSubnetCIDR3
      AvailabilityZone: !Select [2, !GetAZs '']
      MapPublicIpOnLaunch: true

  PublicRouteTable:
    Type: AWS::EC2::RouteTable
    Properties:
      VpcId: !Ref VPC

  PublicRoute:
    Type: AWS::EC2::Route
    DependsOn: VPCGatewayAttachment
    Properties:
      RouteTableId: !Ref PublicRouteTable
      DestinationCidrBlock: 0.0.0.0/0
      GatewayId: !Ref InternetGateway

  PublicSubnet1RouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref PublicSubnet1
      RouteTableId: !Ref PublicRouteTable

  PublicSubnet2RouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref PublicSubnet2
      RouteTableId: !Ref PublicRouteTable

  PublicSubnet3RouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref PublicSubnet3
      RouteTableId: !Ref PublicRouteTable

  NATGatewayEIP:
    Type: AWS::EC2::EIP
    DependsOn: VPCGatewayAttachment
    Properties:
      Domain: vpc

  NATGateway:
    Type: AWS::EC2::NatGateway
    Properties:
      AllocationId: !GetAtt NATGatewayEIP.AllocationId
      SubnetId: !Ref PublicSubnet1

  PrivateSubnet1:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: !Ref PrivateSubnetCIDR1
      AvailabilityZone: !Select [0, !GetAZs '']

  PrivateSubnet2:
    Type: AWS::EC2::Subnet
    Properties:
      VpcId: !Ref VPC
      CidrBlock: !Ref PrivateSubnetCIDR2
      AvailabilityZone: !Select [1, !GetAZs '']

  PrivateRouteTable:
    Type: AWS::EC2::RouteTable
    Properties:
      VpcId: !Ref VPC

  PrivateRoute:
    Type: AWS::EC2::Route
    Properties:
      RouteTableId: !Ref PrivateRouteTable
      DestinationCidrBlock: 0.0.0.0/0
      NatGatewayId: !Ref NATGateway

  PrivateSubnet1RouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref PrivateSubnet1
      RouteTableId: !Ref PrivateRouteTable

  PrivateSubnet2RouteTableAssociation:
    Type: AWS::EC2::SubnetRouteTableAssociation
    Properties:
      SubnetId: !Ref PrivateSubnet2
      RouteTableId: !Ref PrivateRouteTable

  NodeSecurityGroup:
    Type: AWS::EC2::SecurityGroup
    Properties:
      GroupDescription: kite node security group
      VpcId: !Ref VPC
      SecurityGroupIngress:
        - IpProtocol: tcp
          FromPort: 22
          ToPort: 22
          CidrIp: !Ref SSHIngressIPv4Range
        - IpProtocol: tcp
          FromPort: 443
          ToPort: 443
          CidrIp: 0.0.0.0/0
        - IpProtocol: tcp
          FromPort: 6443
          ToPort: 6443
          CidrIp: 0.0.0.0/0

  NodeSecurityGroupIntra:
    Type: AWS::EC2::SecurityGroupIngress
    Properties:
      GroupId: !Ref NodeSecurityGroup
      IpProtocol: '-1'
      SourceSecurityGroupId: !Ref NodeSecurityGroup

Outputs:
  VPCID:
    Value: !Ref VPC
  PublicSubnetIDs:
    Value: !Join [',', [!Ref PublicSubnet1, !Ref PublicSubnet2, !Ref PublicSubnet3]]
  PrivateSubnetIDs:
    Value: !Join [',', [!Ref PrivateSubnet1, !Ref PrivateSubnet2]]
  SecurityGroupID:
    Value: !Ref NodeSecurityGroup
"#;

/// ASG template skeleton; see [`render_asg_template`]. Outputs: `ASGName`.
const ASG_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: kite auto-scaling group

Parameters:
  ASGName:
    Type: String
  ImageID:
    Type: {{IMAGE_PARAMETER_TYPE}}
    Description: AMI, either direct or resolved from an SSM parameter
  KeyName:
    Type: AWS::EC2::KeyPair::KeyName
  RoleName:
    Type: String
    Description: Node role the per-ASG instance profile wraps
  SecurityGroupID:
    Type: AWS::EC2::SecurityGroup::Id
  SubnetIDs:
    Type: List<AWS::EC2::Subnet::Id>
  VolumeSize:
    Type: Number
    Default: 40
  ASGMinSize:
    Type: Number
  ASGMaxSize:
    Type: Number
  ASGDesiredCapacity:
    Type: Number
  KubernetesVersion:
    Type: String
    Default: '1.21'

Resources:
  InstanceProfile:
    Type: AWS::IAM::InstanceProfile
    Properties:
      InstanceProfileName: !Sub '${ASGName}-instance-profile'
      Path: /
      Roles:
        - !Ref RoleName

  LaunchTemplate:
    Type: AWS::EC2::LaunchTemplate
    Properties:
      LaunchTemplateName: !Sub '${ASGName}-launch-template'
      LaunchTemplateData:
        ImageId: !Ref ImageID
        KeyName: !Ref KeyName
        IamInstanceProfile:
          Arn: !GetAtt InstanceProfile.Arn
        SecurityGroupIds:
          - !Ref SecurityGroupID
        BlockDeviceMappings:
          - DeviceName: /dev/xvda
            Ebs:
              VolumeType: gp2
              VolumeSize: !Ref VolumeSize
              DeleteOnTermination: true
        UserData:
          Fn::Base64: !Sub |
            #!/bin/bash
            set -o xtrace
            yum install -y docker
            systemctl enable --now docker
            cat <<'EOF' >/etc/yum.repos.d/kubernetes.repo
            [kubernetes]
            name=Kubernetes
            baseurl=https://packages.cloud.google.com/yum/repos/kubernetes-el7-x86_64
            enabled=1
            gpgcheck=0
            EOF
            yum install -y kubelet-${KubernetesVersion}* kubeadm-${KubernetesVersion}* kubectl-${KubernetesVersion}* --disableexcludes=kubernetes
            systemctl enable kubelet
            echo KITE_PLUGIN_READY

  ASG:
    Type: AWS::AutoScaling::AutoScalingGroup
    UpdatePolicy:
      AutoScalingRollingUpdate:
        MinInstancesInService: !Ref ASGDesiredCapacity
    Properties:
      AutoScalingGroupName: !Ref ASGName
      MinSize: !Ref ASGMinSize
      MaxSize: !Ref ASGMaxSize
      DesiredCapacity: !Ref ASGDesiredCapacity
      VPCZoneIdentifier: !Ref SubnetIDs
      HealthCheckType: EC2
      HealthCheckGracePeriod: 300
      MixedInstancesPolicy:
        LaunchTemplate:
          LaunchTemplateSpecification:
            LaunchTemplateId: !Ref LaunchTemplate
            Version: !GetAtt LaunchTemplate.LatestVersionNumber
          Overrides:
{{INSTANCE_TYPE_OVERRIDES}}
      Tags:
        - Key: Name
          Value: !Ref ASGName
          PropagateAtLaunch: true

Outputs:
  ASGName:
    Value: !Ref ASG
"#;

/// CFN parameter type resolving the image: an SSM parameter indirection
/// when configured, a plain image id otherwise.
fn image_parameter_type(asg: &Asg) -> &'static str {
    if !asg.image_id_ssm_parameter.is_empty() {
        "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>"
    } else {
        "AWS::EC2::Image::Id"
    }
}

/// Render the ASG template for one ASG: image parameter type plus one
/// launch-template override per instance type.
pub fn render_asg_template(asg: &Asg) -> Result<String> {
    let mut overrides = String::new();
    for ty in &asg.instance_types {
        validate_template_input(ty, "instance type")?;
        overrides.push_str(&format!("            - InstanceType: {ty}\n"));
    }
    Ok(ASG_TEMPLATE
        .replace("{{IMAGE_PARAMETER_TYPE}}", image_parameter_type(asg))
        .replace("{{INSTANCE_TYPE_OVERRIDES}}", overrides.trim_end_matches('\n')))
}

/// SSM document template skeleton; see [`render_ssm_template`].
/// Outputs: `SSMDocumentName`.
const SSM_TEMPLATE: &str = r#"AWSTemplateFormatVersion: '2010-09-09'
Description: kite SSM document

Parameters:
  DocumentName:
    Type: String

Resources:
  Document:
    Type: AWS::SSM::Document
    Properties:
      DocumentType: Command
      Name: !Ref DocumentName
      Content:
        schemaVersion: '2.2'
        description: kite per-ASG provisioning commands
        mainSteps:
          - action: aws:runShellScript
            name: runCommands
            inputs:
              timeoutSeconds: '{{EXECUTION_TIMEOUT_SECONDS}}'
              runCommand:
{{RUN_COMMANDS}}

Outputs:
  SSMDocumentName:
    Value: !Ref Document
"#;

/// Render the SSM document template: one runCommand entry per line of the
/// configured commands.
pub fn render_ssm_template(asg: &Asg) -> Result<String> {
    let mut commands = String::new();
    for line in asg.ssm.document_commands.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        commands.push_str(&format!("                - {}\n", serde_json::to_string(line)?));
    }
    if commands.is_empty() {
        anyhow::bail!(
            "ASG {:?} enables an SSM document but has no commands",
            asg.name
        );
    }
    Ok(SSM_TEMPLATE
        .replace(
            "{{EXECUTION_TIMEOUT_SECONDS}}",
            &asg.ssm.document_execution_timeout_seconds.to_string(),
        )
        .replace("{{RUN_COMMANDS}}", commands.trim_end_matches('\n')))
}
